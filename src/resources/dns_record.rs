//! DNS records: label grammar, CNAME exclusivity, per-zone-type capability
//! checks and traffic-policy migration on sync.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::info;

use super::generic::{self, remote_verb, standard_actions};
use super::{service, ActionOutcome, ActionTable, CreateInput, ResourceHooks, UpdateInput};
use crate::engine::OpContext;
use crate::error::{CloudError, Result};
use crate::provider::{DnsCapabilities, RemoteHandle};
use crate::query::ResourceQuery;
use crate::registry::ClassSpec;
use crate::state::models::ResourceRecord;
use crate::sync::SyncScope;

pub const SIMPLE_POLICY: &str = "Simple";
const MIGRATED_POLICY_KEY: &str = "migrated_policy";

pub struct DnsRecordHooks;

/// The fields that decide whether a record is acceptable in its zone.
#[derive(Debug, Clone, Default)]
struct RecordView {
    name: String,
    dns_type: String,
    dns_value: String,
    ttl: Option<i64>,
    mx_priority: Option<i64>,
    policy_type: Option<String>,
    policy_value: Option<String>,
}

impl RecordView {
    fn from_attributes(name: &str, attributes: &Map<String, Value>) -> Self {
        let text = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            name: name.to_string(),
            dns_type: text("dns_type").unwrap_or_default().to_uppercase(),
            dns_value: text("dns_value").unwrap_or_default(),
            ttl: attributes.get("ttl").and_then(Value::as_i64),
            mx_priority: attributes.get("mx_priority").and_then(Value::as_i64),
            policy_type: text("policy_type"),
            policy_value: text("policy_value"),
        }
    }
}

/// `@`, or dot-separated labels with an optional leading `*` label.
/// Labels may start with `_` (service and verification records).
pub fn is_record_name(name: &str) -> Result<bool> {
    if name == "@" {
        return Ok(true);
    }
    let label = Regex::new(r"^_?[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?$")
        .map_err(|e| CloudError::general(format!("label regex: {}", e)))?;
    for (i, part) in name.split('.').enumerate() {
        if part == "*" && i == 0 {
            continue;
        }
        if !label.is_match(part) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Capability set of the zone's provider for its zone type; `None` for
/// local zones, which accept everything.
async fn zone_capabilities(cx: &OpContext, zone: &ResourceRecord) -> Result<Option<DnsCapabilities>> {
    let Some(ref manager_id) = zone.manager_id else {
        return Ok(None);
    };
    let provider = cx.engine.providers.get(manager_id).await?;
    let driver = cx.engine.drivers.driver_for(&provider)?;
    let zone_type = zone.attr_str("zone_type").unwrap_or_default();
    Ok(Some(driver.dns_capabilities(zone_type)))
}

async fn check_cname(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    zone: &ResourceRecord,
    view: &RecordView,
    self_id: Option<&str>,
) -> Result<()> {
    let siblings = cx
        .engine
        .store
        .fetch(&ResourceQuery::new(spec.clone()).filter_by_parent(&zone.id))
        .await?;
    for sibling in siblings {
        if Some(sibling.id.as_str()) == self_id || sibling.name != view.name {
            continue;
        }
        let other_type = sibling.attr_str("dns_type").unwrap_or_default().to_uppercase();
        if view.dns_type == "CNAME" || other_type == "CNAME" {
            return Err(CloudError::not_supported(format!(
                "CNAME {} cannot coexist with {} record",
                view.name, other_type
            )));
        }
    }
    Ok(())
}

/// Type before policy, then TTL. Value format is checked separately so an
/// unsupported type is reported even when the value is missing.
fn check_capabilities(caps: Option<&DnsCapabilities>, view: &RecordView) -> Result<()> {
    if let Some(caps) = caps {
        if !caps.supports_type(&view.dns_type) {
            return Err(CloudError::not_supported(view.dns_type.clone()));
        }
        if let Some(ref policy) = view.policy_type {
            if !caps.supports_policy(policy) {
                return Err(CloudError::not_supported(format!("policy {}", policy)));
            }
            if let (Some(allowed), Some(value)) = (caps.policy_values.get(policy), &view.policy_value) {
                if !allowed.iter().any(|a| a == value) {
                    return Err(CloudError::not_supported(format!(
                        "{} value {}",
                        policy, value
                    )));
                }
            }
        }
        if let Some(ttl) = view.ttl {
            if !caps.ttl_range.contains(ttl) {
                return Err(CloudError::input_parameter(format!(
                    "ttl {} outside {}",
                    ttl, caps.ttl_range
                )));
            }
        }
    }
    Ok(())
}

fn check_value(view: &RecordView) -> Result<()> {
    match view.dns_type.as_str() {
        "A" if view.dns_value.parse::<Ipv4Addr>().is_err() => Err(CloudError::input_parameter(
            format!("A record value {} is not an IPv4 address", view.dns_value),
        )),
        "AAAA" if view.dns_value.parse::<Ipv6Addr>().is_err() => Err(CloudError::input_parameter(
            format!("AAAA record value {} is not an IPv6 address", view.dns_value),
        )),
        "MX" => match view.mx_priority {
            Some(p) if (1..=50).contains(&p) => Ok(()),
            Some(p) => Err(CloudError::input_parameter(format!(
                "mx_priority {} outside 1..=50",
                p
            ))),
            None => Err(CloudError::missing_parameter("mx_priority")),
        },
        _ => Ok(()),
    }
}

#[async_trait]
impl ResourceHooks for DnsRecordHooks {
    async fn validate_create(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        mut input: CreateInput,
    ) -> Result<CreateInput> {
        input.name = input.name.trim().to_lowercase();
        if input.name.is_empty() {
            return Err(CloudError::missing_parameter("name"));
        }
        if !is_record_name(&input.name)? {
            return Err(CloudError::input_parameter(format!(
                "invalid record name {}",
                input.name
            )));
        }
        let zone_ref = input
            .parent_id
            .clone()
            .ok_or_else(|| CloudError::missing_parameter("parent_id"))?;
        let zone = service::find(cx, &cx.engine.spec("dns_zone")?, &zone_ref).await?;

        let view = RecordView::from_attributes(&input.name, &input.attributes);
        if view.dns_type.is_empty() {
            return Err(CloudError::missing_parameter("dns_type"));
        }
        let caps = zone_capabilities(cx, &zone).await?;
        check_capabilities(caps.as_ref(), &view)?;
        if view.dns_value.is_empty() {
            return Err(CloudError::missing_parameter("dns_value"));
        }
        check_value(&view)?;
        check_cname(cx, spec, &zone, &view, None).await?;

        input
            .attributes
            .insert("dns_type".to_string(), json!(view.dns_type));
        generic::validate_create(cx, spec, input).await
    }

    async fn validate_update(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        input: UpdateInput,
    ) -> Result<UpdateInput> {
        let mut input = generic::validate_update(cx, spec, record, input).await?;
        if let Some(name) = input.name.take() {
            let name = name.to_lowercase();
            if !is_record_name(&name)? {
                return Err(CloudError::input_parameter(format!("invalid record name {}", name)));
            }
            input.name = Some(name);
        }
        if let Some(Value::String(t)) = input.attributes.get("dns_type").cloned() {
            input
                .attributes
                .insert("dns_type".to_string(), json!(t.to_uppercase()));
        }

        let mut merged = record.attributes.clone();
        merged.extend(input.attributes.clone());
        let view = RecordView::from_attributes(input.name.as_deref().unwrap_or(&record.name), &merged);
        let zone_id = record
            .parent_id
            .as_deref()
            .ok_or_else(|| CloudError::general(format!("{} has no zone", record.reference())))?;
        let zone = cx.engine.load(&*cx.engine.spec("dns_zone")?, zone_id).await?;
        let caps = zone_capabilities(cx, &zone).await?;
        check_capabilities(caps.as_ref(), &view)?;
        check_value(&view)?;
        check_cname(cx, spec, &zone, &view, Some(&record.id)).await?;
        Ok(input)
    }

    async fn sync_with_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        record: &ResourceRecord,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let synced = generic::sync_with_cloud(cx, spec, record, remote, scope).await?;
        apply_policy(cx, spec, synced, remote, scope).await
    }

    async fn new_from_cloud(
        &self,
        cx: &OpContext,
        spec: &Arc<ClassSpec>,
        remote: &RemoteHandle,
        scope: &SyncScope,
    ) -> Result<ResourceRecord> {
        let record = generic::new_from_cloud(cx, spec, remote, scope).await?;
        apply_policy(cx, spec, record, remote, scope).await
    }

    fn actions(&self, spec: &ClassSpec) -> ActionTable {
        standard_actions(spec)
            .register("enable", |cx, spec, record, _params| {
                toggle(cx, spec, record, true).boxed()
            })
            .register("disable", |cx, spec, record, _params| {
                toggle(cx, spec, record, false).boxed()
            })
            .register("set-traffic-policies", |cx, spec, record, params| {
                set_traffic_policies(cx, spec, record, params).boxed()
            })
    }
}

/// Copy the remote traffic policy and move records whose policy the zone's
/// provider no longer supports to `Simple`, keeping the old one in metadata.
async fn apply_policy(
    cx: &OpContext,
    spec: &Arc<ClassSpec>,
    mut record: ResourceRecord,
    remote: &RemoteHandle,
    scope: &SyncScope,
) -> Result<ResourceRecord> {
    let mut changed = false;
    for key in ["policy_type", "policy_value"] {
        if let Some(Value::String(value)) = remote.attribute(key) {
            if record.attr_str(key) != Some(value.as_str()) {
                record.set_attr(key, json!(value));
                changed = true;
            }
        }
    }

    let zone_type = scope
        .parent
        .as_ref()
        .and_then(|z| z.attr_str("zone_type"))
        .unwrap_or_default();
    let caps = scope.driver.dns_capabilities(zone_type);
    if let Some(policy) = record.attr_str("policy_type").map(str::to_string) {
        if !caps.supports_policy(&policy) {
            let old = json!({
                "policy_type": policy,
                "policy_value": record.attr("policy_value"),
            });
            cx.engine
                .store
                .set_metadata(spec.keyword, &record.id, MIGRATED_POLICY_KEY, &old.to_string())
                .await?;
            record.set_attr("policy_type", json!(SIMPLE_POLICY));
            record.attributes.remove("policy_value");
            changed = true;
            info!(record = %record.reference(), old_policy = %policy, "Migrated unsupported traffic policy to Simple");
        }
    }
    if changed {
        cx.engine.store.update_resource(spec, &record).await?;
    }
    Ok(record)
}

async fn toggle(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    mut record: ResourceRecord,
    enabled: bool,
) -> Result<ActionOutcome> {
    if record.is_managed() && record.is_external() {
        let verb = if enabled { "enable" } else { "disable" };
        return remote_verb(&cx, &spec, record, verb, json!({})).await;
    }
    record.enabled = enabled;
    cx.engine.store.update_resource(&spec, &record).await?;
    Ok(ActionOutcome::done(record))
}

/// Params: `{"policy_type": "...", "policy_value": "..."}`.
async fn set_traffic_policies(
    cx: OpContext,
    spec: Arc<ClassSpec>,
    mut record: ResourceRecord,
    params: Value,
) -> Result<ActionOutcome> {
    let policy_type = params
        .get("policy_type")
        .and_then(Value::as_str)
        .ok_or_else(|| CloudError::missing_parameter("policy_type"))?
        .to_string();
    let policy_value = params
        .get("policy_value")
        .and_then(Value::as_str)
        .map(str::to_string);

    let zone_id = record
        .parent_id
        .clone()
        .ok_or_else(|| CloudError::general(format!("{} has no zone", record.reference())))?;
    let zone = cx.engine.load(&*cx.engine.spec("dns_zone")?, &zone_id).await?;
    let mut view = RecordView::from_attributes(&record.name, &record.attributes);
    view.policy_type = Some(policy_type.clone());
    view.policy_value = policy_value.clone();
    check_capabilities(zone_capabilities(&cx, &zone).await?.as_ref(), &view)?;

    record.set_attr("policy_type", json!(policy_type));
    match policy_value {
        Some(ref value) => record.set_attr("policy_value", json!(value)),
        None => {
            record.attributes.remove("policy_value");
        }
    }
    cx.engine.store.update_resource(&spec, &record).await?;

    if record.is_managed() && record.is_external() {
        let push = json!({ "policy_type": policy_type, "policy_value": policy_value });
        return remote_verb(&cx, &spec, record, "set-traffic-policies", push).await;
    }
    Ok(ActionOutcome::done(record))
}
