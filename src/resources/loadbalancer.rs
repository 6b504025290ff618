//! Load balancer ACLs: entry validation and the `patch` action.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::generic::{self, standard_actions};
use super::{ActionOutcome, ActionTable, CreateInput, ResourceHooks};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::registry::{is_cidr, ClassSpec};
use crate::state::models::ResourceRecord;
use crate::task::{self, kinds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclEntry {
    pub cidr: String,
    #[serde(default)]
    pub comment: String,
}

/// Body of the `patch` action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AclPatch {
    pub add: Vec<AclEntry>,
    /// CIDRs to drop.
    pub remove: Vec<String>,
}

pub fn parse_entries(value: Option<&Value>) -> Result<Vec<AclEntry>> {
    let entries: Vec<AclEntry> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| CloudError::input_parameter(format!("acl_entries: {}", e)))?,
    };
    for entry in &entries {
        check_cidr(&entry.cidr)?;
    }
    Ok(entries)
}

fn check_cidr(cidr: &str) -> Result<()> {
    // A bare address is a /32.
    if is_cidr(cidr) || cidr.parse::<std::net::Ipv4Addr>().is_ok() {
        Ok(())
    } else {
        Err(CloudError::input_parameter(format!("invalid acl cidr {}", cidr)))
    }
}

/// Apply `patch` to `entries`: removals first, then additions that are not
/// already present. Order of surviving entries is kept.
pub fn apply_patch(mut entries: Vec<AclEntry>, patch: &AclPatch) -> Result<Vec<AclEntry>> {
    for entry in &patch.add {
        check_cidr(&entry.cidr)?;
    }
    entries.retain(|e| !patch.remove.iter().any(|r| *r == e.cidr));
    for entry in &patch.add {
        if !entries.iter().any(|e| e.cidr == entry.cidr) {
            entries.push(entry.clone());
        }
    }
    Ok(entries)
}

pub struct AclHooks;

#[async_trait]
impl ResourceHooks for AclHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        mut input: CreateInput,
    ) -> Result<CreateInput> {
        let entries = parse_entries(input.attributes.get("acl_entries"))?;
        input
            .attributes
            .insert("acl_entries".to_string(), serde_json::to_value(&entries)?);
        generic::validate_create(cx, spec, input).await
    }

    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        standard_actions(spec).register("patch", |cx, spec, record, params| {
            patch(cx, spec, record, params).boxed()
        })
    }
}

async fn patch(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    mut record: ResourceRecord,
    params: Value,
) -> Result<ActionOutcome> {
    if spec.statuses.is_transitional(&record.status) {
        return Err(CloudError::invalid_status(
            record.status.clone(),
            spec.statuses.ready,
        ));
    }
    let patch: AclPatch = serde_json::from_value(params)
        .map_err(|e| CloudError::input_parameter(format!("patch: {}", e)))?;
    if patch.add.is_empty() && patch.remove.is_empty() {
        return Err(CloudError::missing_parameter("add"));
    }
    let current = parse_entries(record.attr("acl_entries"))?;
    let entries = serde_json::to_value(apply_patch(current, &patch)?)?;
    record.set_attr("acl_entries", entries.clone());
    record.updated_at = chrono::Utc::now().to_rfc3339();
    cx.engine.store.update_resource(&spec, &record).await?;

    if record.is_managed() && record.is_external() {
        let task_id = task::start_for(
            &cx,
            kinds::UPDATE,
            &record,
            json!({ "verb": "update", "params": { "acl_entries": entries } }),
        )
        .await?;
        let record = cx.engine.load(&spec, &record.id).await?;
        return Ok(ActionOutcome::task(record, task_id));
    }
    Ok(ActionOutcome::done(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cidr: &str) -> AclEntry {
        AclEntry {
            cidr: cidr.to_string(),
            comment: String::new(),
        }
    }

    #[test]
    fn patch_removes_then_adds_without_duplicates() {
        let entries = vec![entry("10.0.0.0/8"), entry("192.168.1.0/24")];
        let patch = AclPatch {
            add: vec![entry("10.0.0.0/8"), entry("172.16.0.0/12")],
            remove: vec!["192.168.1.0/24".to_string()],
        };
        let out = apply_patch(entries, &patch).unwrap();
        let cidrs: Vec<&str> = out.iter().map(|e| e.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["10.0.0.0/8", "172.16.0.0/12"]);
    }

    #[test]
    fn patch_rejects_bad_cidr() {
        let patch = AclPatch {
            add: vec![entry("10.0.0.0/40")],
            remove: Vec::new(),
        };
        assert!(apply_patch(Vec::new(), &patch).is_err());
    }
}
