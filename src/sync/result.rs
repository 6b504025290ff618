use std::fmt;

use serde::Serialize;

use crate::error::CloudError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    List,
    Add,
    Update,
    Delete,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOp::List => "list",
            SyncOp::Add => "add",
            SyncOp::Update => "update",
            SyncOp::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One per-record failure kept for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SyncDiagnostic {
    pub class: String,
    pub op: SyncOp,
    pub reference: String,
    pub code: String,
    pub message: String,
}

/// Counters of one class sync, or of a whole cycle once merged.
/// Per-record failures never abort a sync; they are counted here and the
/// first `error_limit` are kept verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub add_errors: usize,
    pub update_errors: usize,
    pub delete_errors: usize,
    pub list_errors: usize,
    pub diagnostics: Vec<SyncDiagnostic>,
    /// Diagnostics dropped once the limit was reached.
    pub truncated: usize,
    #[serde(skip)]
    error_limit: Option<usize>,
}

impl SyncResult {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            error_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn error(&mut self, class: &str, op: SyncOp, reference: &str, err: &CloudError) {
        match op {
            SyncOp::List => self.list_errors += 1,
            SyncOp::Add => self.add_errors += 1,
            SyncOp::Update => self.update_errors += 1,
            SyncOp::Delete => self.delete_errors += 1,
        }
        tracing::warn!(class, op = %op, reference, error = %err, "Sync step failed");
        self.push(SyncDiagnostic {
            class: class.to_string(),
            op,
            reference: reference.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    fn push(&mut self, diagnostic: SyncDiagnostic) {
        match self.error_limit {
            Some(limit) if self.diagnostics.len() >= limit => self.truncated += 1,
            _ => self.diagnostics.push(diagnostic),
        }
    }

    /// Fold another result into this one, keeping this result's limit.
    pub fn merge(&mut self, other: SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.add_errors += other.add_errors;
        self.update_errors += other.update_errors;
        self.delete_errors += other.delete_errors;
        self.list_errors += other.list_errors;
        self.truncated += other.truncated;
        for diagnostic in other.diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn errors(&self) -> usize {
        self.add_errors + self.update_errors + self.delete_errors + self.list_errors
    }

    pub fn is_ok(&self) -> bool {
        self.errors() == 0
    }

    pub fn changes(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} deleted, {} errors",
            self.added,
            self.updated,
            self.deleted,
            self.errors()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_bounded() {
        let mut result = SyncResult::with_limit(2);
        for i in 0..5 {
            result.error("vpc", SyncOp::Add, &format!("vpc-{}", i), &CloudError::general("boom"));
        }
        assert_eq!(result.add_errors, 5);
        assert_eq!(result.diagnostics.len(), 2);
        assert_eq!(result.truncated, 3);
    }

    #[test]
    fn merge_keeps_outer_limit() {
        let mut outer = SyncResult::with_limit(1);
        let mut inner = SyncResult::default();
        inner.added = 2;
        inner.error("zone", SyncOp::Delete, "z1", &CloudError::not_empty("zone"));
        inner.error("zone", SyncOp::Delete, "z2", &CloudError::not_empty("zone"));
        outer.merge(inner);
        assert_eq!(outer.added, 2);
        assert_eq!(outer.delete_errors, 2);
        assert_eq!(outer.diagnostics.len(), 1);
        assert_eq!(outer.truncated, 1);
        assert_eq!(outer.to_string(), "2 added, 0 updated, 0 deleted, 2 errors");
    }
}
