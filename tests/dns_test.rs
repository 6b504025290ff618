use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use cloudmirror::config::types::{EngineConfig, ProviderSeed};
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::provider::snapshot::{Inventory, SnapshotDriver};
use cloudmirror::provider::{DnsCapabilities, RemoteScope, TtlRange};
use cloudmirror::query::{ListInput, ResourceQuery};
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::state::models::{ProviderRecord, ResourceRecord};
use cloudmirror::state::sqlite::SqliteBackend;

async fn setup() -> (Arc<Engine>, Arc<SnapshotDriver>, ProviderRecord) {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let provider = engine
        .providers
        .add(&ProviderSeed {
            name: "p".to_string(),
            brand: "snapshot".to_string(),
            account_id: String::new(),
            endpoint: String::new(),
            credentials: String::new(),
            domain_id: "default".to_string(),
            project_id: String::new(),
            project_src: "local".to_string(),
            sync_cooldown_secs: None,
        })
        .await
        .unwrap();
    let driver = Arc::new(SnapshotDriver::new(Inventory::default()));
    driver.set_dns_capabilities(
        "PublicZone",
        DnsCapabilities {
            record_types: vec!["A".to_string(), "AAAA".to_string()],
            policy_types: vec!["Simple".to_string()],
            policy_values: BTreeMap::new(),
            ttl_range: TtlRange::Continuous { min: 60, max: 3600 },
        },
    );
    driver.set_dns_capabilities(
        "PrivateZone",
        DnsCapabilities {
            record_types: vec!["A".to_string(), "CNAME".to_string()],
            policy_types: vec!["Simple".to_string()],
            ..DnsCapabilities::default()
        },
    );
    engine.drivers.register_driver(&provider.id, driver.clone());
    (engine, driver, provider)
}

async fn managed_zone(engine: &Arc<Engine>, provider: &ProviderRecord, name: &str) -> ResourceRecord {
    let cx = OpContext::system(engine);
    let mut input = CreateInput::new(name).with_attr("zone_type", json!("PublicZone"));
    input.manager_id = Some(provider.id.clone());
    let (zone, task_id) = service::create(&cx, "dns_zone", input).await.unwrap();
    let task = engine
        .tasks
        .wait_for(engine, &task_id.expect("create task"))
        .await
        .unwrap();
    assert_eq!(task.status, "done", "{:?}", task.failed_reasons);
    service::get(&cx, "dns_zone", &zone.id).await.unwrap()
}

fn record_input(zone: &ResourceRecord, name: &str, dns_type: &str, value: &str) -> CreateInput {
    let mut input = CreateInput::new(name)
        .with_attr("dns_type", json!(dns_type))
        .with_attr("dns_value", json!(value));
    input.parent_id = Some(zone.id.clone());
    input
}

async fn records_in(engine: &Arc<Engine>, zone_id: &str) -> Vec<ResourceRecord> {
    let query = ResourceQuery::new(engine.spec("dns_record").unwrap()).filter_by_parent(zone_id);
    engine.store.fetch(&query).await.unwrap()
}

#[tokio::test]
async fn test_managed_zone_is_created_remotely() {
    let (engine, driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "Example.COM").await;

    assert_eq!(zone.name, "example.com");
    assert_eq!(zone.status, "available");
    assert!(zone.is_external());
    let remote = driver.objects("dns_zone", &RemoteScope::global());
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].global_id, zone.external_id);
}

#[tokio::test]
async fn test_unsupported_record_type_rejected_before_write() {
    let (engine, _driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    let input = record_input(&zone, "mail", "MX", "mx.example.com")
        .with_attr("mx_priority", json!(10))
        .with_attr("policy_type", json!("weighted"));
    let err = service::create(&cx, "dns_record", input).await.unwrap_err();
    assert_eq!(err.code(), "not_supported");
    assert!(err.to_string().contains("MX"));
    assert!(records_in(&engine, &zone.id).await.is_empty());
}

#[tokio::test]
async fn test_unsupported_type_wins_over_missing_value() {
    let (engine, _driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    let mut input = CreateInput::new("mail")
        .with_attr("dns_type", json!("MX"))
        .with_attr("policy_type", json!("weighted"));
    input.parent_id = Some(zone.id.clone());
    let err = service::create(&cx, "dns_record", input).await.unwrap_err();
    assert_eq!(err.code(), "not_supported");
    assert!(err.to_string().contains("MX"));
    assert!(records_in(&engine, &zone.id).await.is_empty());

    // A supported type still needs its value.
    let mut input = CreateInput::new("www").with_attr("dns_type", json!("A"));
    input.parent_id = Some(zone.id.clone());
    let err = service::create(&cx, "dns_record", input).await.unwrap_err();
    assert_eq!(err.code(), "missing_parameter");
}

#[tokio::test]
async fn test_unsupported_policy_rejected() {
    let (engine, _driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    let input = record_input(&zone, "www", "A", "10.0.0.1").with_attr("policy_type", json!("Weighted"));
    let err = service::create(&cx, "dns_record", input).await.unwrap_err();
    assert_eq!(err.code(), "not_supported");

    let input = record_input(&zone, "www", "A", "10.0.0.1").with_attr("ttl", json!(30));
    let err = service::create(&cx, "dns_record", input).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");
}

#[tokio::test]
async fn test_supported_record_is_materialized() {
    let (engine, driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    let input = record_input(&zone, "WWW", "a", "10.0.0.1").with_attr("policy_type", json!("Simple"));
    let (record, task_id) = service::create(&cx, "dns_record", input).await.unwrap();
    assert_eq!(record.name, "www");
    assert_eq!(record.attr_str("dns_type"), Some("A"));
    let task = engine.tasks.wait_for(&engine, &task_id.unwrap()).await.unwrap();
    assert_eq!(task.status, "done", "{:?}", task.failed_reasons);

    let record = service::get(&cx, "dns_record", &record.id).await.unwrap();
    assert!(record.is_external());
    let remote = driver.objects("dns_record", &RemoteScope::global().child(&zone.external_id));
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].name, "www");
}

#[tokio::test]
async fn test_record_value_checks() {
    let (engine, _driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    let err = service::create(&cx, "dns_record", record_input(&zone, "www", "A", "not-an-ip"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let err = service::create(&cx, "dns_record", record_input(&zone, "bad label!", "A", "10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "input_parameter");
}

#[tokio::test]
async fn test_zone_create_validation() {
    let (engine, _driver, provider) = setup().await;
    let cx = OpContext::system(&engine);

    let bogus = CreateInput::new("example.com").with_attr("zone_type", json!("Bogus"));
    let err = service::create(&cx, "dns_zone", bogus).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let err = service::create(&cx, "dns_zone", CreateInput::new("example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let mut undotted = CreateInput::new("localhost").with_attr("zone_type", json!("PublicZone"));
    undotted.manager_id = Some(provider.id.clone());
    let err = service::create(&cx, "dns_zone", undotted).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let mut private = CreateInput::new("corp.internal").with_attr("zone_type", json!("PrivateZone"));
    private.manager_id = Some(provider.id.clone());
    let err = service::create(&cx, "dns_zone", private).await.unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let invalid = CreateInput::new("bad_name!.com").with_attr("zone_type", json!("PublicZone"));
    let err = service::create(&cx, "dns_zone", invalid).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");
}

#[tokio::test]
async fn test_cname_cannot_share_a_name() {
    let (engine, _driver, _provider) = setup().await;
    let cx = OpContext::system(&engine);

    let input = CreateInput::new("corp.internal").with_attr("zone_type", json!("PublicZone"));
    let (zone, task_id) = service::create(&cx, "dns_zone", input).await.unwrap();
    assert!(task_id.is_none());
    assert_eq!(zone.status, "available");

    let (_, task_id) = service::create(&cx, "dns_record", record_input(&zone, "www", "A", "10.0.0.1"))
        .await
        .unwrap();
    if let Some(task_id) = task_id {
        engine.tasks.wait_for(&engine, &task_id).await.unwrap();
    }

    let err = service::create(&cx, "dns_record", record_input(&zone, "www", "CNAME", "web.corp.internal"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_supported");

    service::create(&cx, "dns_record", record_input(&zone, "www", "A", "10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(records_in(&engine, &zone.id).await.len(), 2);
}

#[tokio::test]
async fn test_zone_delete_removes_records_first() {
    let (engine, driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    for (name, ip) in [("www", "10.0.0.1"), ("api", "10.0.0.2")] {
        let (_, task_id) = service::create(&cx, "dns_record", record_input(&zone, name, "A", ip))
            .await
            .unwrap();
        engine.tasks.wait_for(&engine, &task_id.unwrap()).await.unwrap();
    }
    assert_eq!(records_in(&engine, &zone.id).await.len(), 2);

    let task_id = service::delete(&cx, "dns_zone", &zone.id).await.unwrap();
    let task = engine.tasks.wait_for(&engine, &task_id.unwrap()).await.unwrap();
    assert_eq!(task.status, "done", "{:?}", task.failed_reasons);
    engine.tasks.wait_idle().await;

    assert!(records_in(&engine, &zone.id).await.is_empty());
    let err = service::get(&cx, "dns_zone", &zone.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(driver.objects("dns_zone", &RemoteScope::global()).is_empty());

    let listed = service::list(&cx, "dns_zone", &ListInput::default()).await.unwrap();
    assert_eq!(listed.total, 0);
}

#[tokio::test]
async fn test_remote_delete_failure_marks_zone() {
    let (engine, driver, provider) = setup().await;
    let zone = managed_zone(&engine, &provider, "example.com").await;
    let cx = OpContext::system(&engine);

    driver.fail("dns_zone", "delete");
    let task_id = service::delete(&cx, "dns_zone", &zone.id).await.unwrap().unwrap();
    let task = engine.tasks.wait_for(&engine, &task_id).await.unwrap();
    assert_eq!(task.status, "failed");
    assert_eq!(task.failed_reasons.len(), 1);

    let zone = service::get(&cx, "dns_zone", &zone.id).await.unwrap();
    assert_eq!(zone.status, "delete_failed");
    assert!(zone.status_reason.contains("delete"));

    driver.heal();
    let task_id = service::delete(&cx, "dns_zone", &zone.id).await.unwrap().unwrap();
    let task = engine.tasks.wait_for(&engine, &task_id).await.unwrap();
    assert_eq!(task.status, "done");
}
