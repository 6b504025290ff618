use std::collections::HashSet;

use crate::engine::OpContext;
use crate::error::Result;
use crate::lock::LockGuard;
use crate::registry::{ClassSpec, Ownership};
use crate::state::models::NameScope;

/// First of `base`, `base-2`, `base-3`, ... not in `taken`.
pub fn alter_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Name-uniqueness scope for a record of `spec` with the given placement.
pub fn name_scope(spec: &ClassSpec, parent_id: Option<&str>, domain_id: &str, project_id: &str) -> NameScope {
    if let Some(parent_id) = parent_id {
        return NameScope::parent(parent_id);
    }
    match spec.ownership {
        Ownership::Project => NameScope::owner(domain_id, Some(project_id)),
        Ownership::Domain => NameScope::owner(domain_id, None),
        Ownership::Inherit | Ownership::Public => NameScope::default(),
    }
}

/// A name picked under the class's name lock. Keep it alive until the record
/// carrying the name is written.
pub struct ReservedName {
    pub name: String,
    _guard: Option<LockGuard>,
}

/// Pick a free name derived from `base` within `scope`. `current` is the
/// record's own present name, which never counts as taken.
pub async fn reserve_name(
    cx: &OpContext,
    spec: &ClassSpec,
    scope: &NameScope,
    base: &str,
    current: Option<&str>,
) -> Result<ReservedName> {
    if !spec.unique_names() {
        return Ok(ReservedName {
            name: base.to_string(),
            _guard: None,
        });
    }
    let guard = cx
        .engine
        .locks
        .lock_name(&cx.unit, spec.keyword, &scope_key(scope))
        .await;
    let mut taken = cx.engine.store.live_names(spec, scope).await?;
    if let Some(current) = current {
        taken.remove(current);
    }
    let name = alter_name(base, &taken);
    if name != base {
        tracing::debug!(class = spec.keyword, base, name = %name, "Altered duplicate name");
    }
    Ok(ReservedName {
        name,
        _guard: Some(guard),
    })
}

/// Whether `name` is free within `scope`, for strict create requests.
pub async fn is_free(cx: &OpContext, spec: &ClassSpec, scope: &NameScope, name: &str) -> Result<bool> {
    if !spec.unique_names() {
        return Ok(true);
    }
    Ok(!cx.engine.store.live_names(spec, scope).await?.contains(name))
}

fn scope_key(scope: &NameScope) -> String {
    format!(
        "{}/{}/{}",
        scope.parent_id.as_deref().unwrap_or("-"),
        scope.domain_id.as_deref().unwrap_or("-"),
        scope.project_id.as_deref().unwrap_or("-")
    )
}
