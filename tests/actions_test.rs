use std::sync::Arc;

use serde_json::{json, Value};

use cloudmirror::config::types::{EngineConfig, ProviderSeed};
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::identity::Identity;
use cloudmirror::provider::snapshot::{Inventory, SnapshotDriver};
use cloudmirror::provider::{RemoteHandle, RemoteObject, RemoteScope};
use cloudmirror::query::ResourceQuery;
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::state::models::{ProviderRecord, ResourceRecord};
use cloudmirror::state::sqlite::SqliteBackend;
use cloudmirror::sync::cycle::{sync_provider, CycleOptions};
use cloudmirror::sync::engine::sync_class;
use cloudmirror::sync::{SyncOptions, SyncScope};

fn seed(name: &str, project_src: &str) -> ProviderSeed {
    ProviderSeed {
        name: name.to_string(),
        brand: "snapshot".to_string(),
        account_id: String::new(),
        endpoint: String::new(),
        credentials: String::new(),
        domain_id: "default".to_string(),
        project_id: "ops".to_string(),
        project_src: project_src.to_string(),
        sync_cooldown_secs: None,
    }
}

async fn setup_with(project_src: &str) -> (Arc<Engine>, Arc<SnapshotDriver>, ProviderRecord) {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let provider = engine.providers.add(&seed("p1", project_src)).await.unwrap();
    let driver = Arc::new(SnapshotDriver::new(Inventory::default()));
    driver.set_regions(vec![RemoteObject::new("r1", "region-one")]);
    engine.drivers.register_driver(&provider.id, driver.clone());
    (engine, driver, provider)
}

async fn setup() -> (Arc<Engine>, Arc<SnapshotDriver>, ProviderRecord) {
    setup_with("local").await
}

async fn cycle(engine: &Arc<Engine>, provider: &ProviderRecord) {
    let report = sync_provider(engine, &provider.name, CycleOptions { force: true, xor: false })
        .await
        .unwrap();
    assert!(report.ran());
}

async fn only(engine: &Arc<Engine>, class: &str) -> ResourceRecord {
    let mut records = engine
        .store
        .fetch(&ResourceQuery::new(engine.spec(class).unwrap()))
        .await
        .unwrap();
    assert_eq!(records.len(), 1, "expected one {}", class);
    records.remove(0)
}

async fn finish(engine: &Arc<Engine>, task_id: Option<String>) {
    let task_id = task_id.expect("action should start a task");
    let task = engine.tasks.wait_for(engine, &task_id).await.unwrap();
    assert_eq!(task.status, "done", "{:?}", task.failed_reasons);
}

// ─── change-config ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_change_config_resizes_remote_cache() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources(
        "elasticcache",
        vec![RemoteObject::new("ec-1", "sessions")
            .with_region("r1")
            .with_status("available")
            .with_attr("engine", json!("redis"))
            .with_attr("engine_version", json!("6.0"))
            .with_attr("instance_type", json!("small"))],
    );
    cycle(&engine, &provider).await;
    let cache = only(&engine, "elasticcache").await;
    let cx = OpContext::system(&engine);

    let unchanged = service::perform(&cx, "elasticcache", &cache.id, "change-config", json!({ "instance_type": "small" }))
        .await
        .unwrap();
    assert!(unchanged.task_id.is_none());

    let outcome = service::perform(&cx, "elasticcache", &cache.id, "change-config", json!({ "instance_type": "large" }))
        .await
        .unwrap();
    finish(&engine, outcome.task_id).await;

    let cache = service::get(&cx, "elasticcache", &cache.id).await.unwrap();
    assert_eq!(cache.attr_str("instance_type"), Some("large"));
    assert_eq!(cache.status, "available");
    let remote = driver.objects("elasticcache", &RemoteScope::region(Some("r1")));
    assert_eq!(remote[0].attributes.get("instance_type"), Some(&json!("large")));
}

#[tokio::test]
async fn test_change_config_rejects_bad_params() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources(
        "dbinstance",
        vec![RemoteObject::new("db-1", "orders")
            .with_region("r1")
            .with_status("available")
            .with_attr("engine", json!("mysql"))
            .with_attr("engine_version", json!("8.0"))
            .with_attr("instance_type", json!("db.small"))],
    );
    cycle(&engine, &provider).await;
    let db = only(&engine, "dbinstance").await;
    let cx = OpContext::system(&engine);

    let err = service::perform(&cx, "dbinstance", &db.id, "change-config", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let err = service::perform(&cx, "dbinstance", &db.id, "change-config", json!({ "port": 3307 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let err = service::perform(&cx, "bucket", "nothing", "change-config", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_cache_engine_is_validated_on_create() {
    let (engine, _driver, _provider) = setup().await;
    let cx = OpContext::system(&engine);
    let input = CreateInput::new("local-cache")
        .with_attr("engine", json!("Oracle"))
        .with_attr("engine_version", json!("1"))
        .with_attr("instance_type", json!("small"));
    let err = service::create(&cx, "elasticcache", input).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");

    let input = CreateInput::new("local-cache").with_attr("instance_type", json!("small"));
    let err = service::create(&cx, "elasticcache", input).await.unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let input = CreateInput::new("local-cache")
        .with_attr("engine", json!("Redis"))
        .with_attr("engine_version", json!("7"))
        .with_attr("instance_type", json!("small"));
    let (record, task_id) = service::create(&cx, "elasticcache", input).await.unwrap();
    assert!(task_id.is_none());
    assert_eq!(record.attr_str("engine"), Some("redis"));
}

// ─── Routes ─────────────────────────────────────────────────────────────────

fn mesh_with_route() -> RemoteObject {
    RemoteObject::new("ivn-1", "mesh")
        .with_status("available")
        .with_children(
            "inter_vpc_network_route",
            vec![RemoteObject::new("rt-1", "to-office")
                .with_status("available")
                .with_attr("cidr", json!("10.1.0.0/16"))],
        )
}

#[tokio::test]
async fn test_route_disable_goes_through_provider() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources("inter_vpc_network", vec![mesh_with_route()]);
    cycle(&engine, &provider).await;
    let route = only(&engine, "inter_vpc_network_route").await;
    assert!(route.enabled);
    let cx = OpContext::system(&engine);

    let outcome = service::perform(&cx, "inter_vpc_network_route", &route.id, "disable", Value::Null)
        .await
        .unwrap();
    finish(&engine, outcome.task_id).await;

    let route = service::get(&cx, "inter_vpc_network_route", &route.id).await.unwrap();
    assert!(!route.enabled);
    assert_eq!(route.status, "available");

    // Already disabled: nothing to send.
    let again = service::perform(&cx, "inter_vpc_network_route", &route.id, "disable", Value::Null)
        .await
        .unwrap();
    assert!(again.task_id.is_none());
}

#[tokio::test]
async fn test_route_update_failure_marks_route() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources("inter_vpc_network", vec![mesh_with_route()]);
    cycle(&engine, &provider).await;
    let route = only(&engine, "inter_vpc_network_route").await;
    driver.fail("inter_vpc_network_route", "update");
    let cx = OpContext::system(&engine);

    let outcome = service::perform(&cx, "inter_vpc_network_route", &route.id, "disable", Value::Null)
        .await
        .unwrap();
    let task = engine
        .tasks
        .wait_for(&engine, outcome.task_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(task.status, "failed");

    let route = service::get(&cx, "inter_vpc_network_route", &route.id).await.unwrap();
    assert_eq!(route.status, "update_failed");
    assert!(route.enabled);
}

// ─── ACL patch ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_local_acl_patch() {
    let (engine, _driver, _provider) = setup().await;
    let cx = OpContext::system(&engine);
    let input = CreateInput::new("office")
        .with_attr("acl_entries", json!([{ "cidr": "10.0.0.0/8" }, { "cidr": "172.16.0.0/12" }]));
    let (acl, _) = service::create(&cx, "loadbalancer_acl", input).await.unwrap();

    let outcome = service::perform(
        &cx,
        "loadbalancer_acl",
        &acl.id,
        "patch",
        json!({ "add": [{ "cidr": "192.168.0.0/16", "comment": "lab" }], "remove": ["10.0.0.0/8"] }),
    )
    .await
    .unwrap();
    assert!(outcome.task_id.is_none());

    let acl = service::get(&cx, "loadbalancer_acl", &acl.id).await.unwrap();
    assert_eq!(
        acl.attr("acl_entries"),
        Some(&json!([
            { "cidr": "172.16.0.0/12", "comment": "" },
            { "cidr": "192.168.0.0/16", "comment": "lab" }
        ]))
    );

    let err = service::perform(&cx, "loadbalancer_acl", &acl.id, "patch", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let err = service::perform(&cx, "loadbalancer_acl", &acl.id, "patch", json!({ "add": [{ "cidr": "nope" }] }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "input_parameter");
}

#[tokio::test]
async fn test_managed_acl_patch_pushes_entries() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources(
        "loadbalancer_acl",
        vec![RemoteObject::new("acl-1", "edge")
            .with_region("r1")
            .with_status("available")
            .with_attr("acl_entries", json!([{ "cidr": "10.0.0.0/8", "comment": "" }]))],
    );
    cycle(&engine, &provider).await;
    let acl = only(&engine, "loadbalancer_acl").await;
    let cx = OpContext::system(&engine);

    let outcome = service::perform(&cx, "loadbalancer_acl", &acl.id, "patch", json!({ "add": [{ "cidr": "1.2.3.4" }] }))
        .await
        .unwrap();
    finish(&engine, outcome.task_id).await;

    let remote = driver.objects("loadbalancer_acl", &RemoteScope::region(Some("r1")));
    let entries = remote[0].attributes.get("acl_entries").cloned().unwrap();
    assert_eq!(entries.as_array().map(Vec::len), Some(2));
    let acl = service::get(&cx, "loadbalancer_acl", &acl.id).await.unwrap();
    assert_eq!(acl.attr("acl_entries"), Some(&entries));
    assert_eq!(acl.status, "available");
}

// ─── Ownership, tags and refresh ────────────────────────────────────────────

#[tokio::test]
async fn test_cloud_projects_map_to_local_projects() {
    let (engine, driver, provider) = setup_with("cloud").await;
    driver.set_projects(vec![RemoteObject::new("proj-x", "team-x")]);
    driver.set_resources(
        "bucket",
        vec![
            RemoteObject::new("b-1", "assets").with_region("r1").with_project("proj-x"),
            RemoteObject::new("b-2", "scratch").with_region("r1").with_project("proj-new"),
            RemoteObject::new("b-3", "shared").with_region("r1"),
        ],
    );
    cycle(&engine, &provider).await;

    let team = engine
        .store
        .get_project_by_name("default", "team-x")
        .await
        .unwrap()
        .expect("project for the mapped cloud project");
    let created = engine
        .store
        .get_project_by_name("default", "proj-new")
        .await
        .unwrap()
        .expect("project created for an unmapped tag");

    let cx = OpContext::system(&engine);
    let assets = service::get(&cx, "bucket", "assets").await.unwrap();
    assert_eq!(assets.project_id, team.id);
    assert_eq!(assets.project_src, "cloud");
    let scratch = service::get(&cx, "bucket", "scratch").await.unwrap();
    assert_eq!(scratch.project_id, created.id);
    let shared = service::get(&cx, "bucket", "shared").await.unwrap();
    assert_eq!(shared.project_id, "ops");
    assert_eq!(shared.project_src, "system");

    let mapping = only(&engine, "externalproject").await;
    assert_eq!(mapping.attr_str("project_id"), Some(team.id.as_str()));
}

#[tokio::test]
async fn test_remote_tags_replace_metadata() {
    let (engine, driver, provider) = setup().await;
    let cx = OpContext::system(&engine);
    let spec = engine.spec("global_network").unwrap();
    let scope = SyncScope::new(provider, driver);

    let tagged: RemoteHandle = Arc::new(
        RemoteObject::new("gn-1", "backbone")
            .with_tag("env", "prod")
            .with_tag("team", "net"),
    );
    sync_class(&cx, spec.clone(), scope.clone(), vec![tagged], SyncOptions::full()).await;
    let record = only(&engine, "global_network").await;
    engine
        .store
        .set_metadata("global_network", &record.id, "user:note", "keep")
        .await
        .unwrap();

    let retagged: RemoteHandle = Arc::new(RemoteObject::new("gn-1", "backbone").with_tag("env", "staging"));
    sync_class(&cx, spec, scope, vec![retagged], SyncOptions::full()).await;

    let meta = engine.store.get_metadata("global_network", &record.id).await.unwrap();
    assert_eq!(meta.get("ext:env").map(String::as_str), Some("staging"));
    assert!(!meta.contains_key("ext:team"));
    assert_eq!(meta.get("user:note").map(String::as_str), Some("keep"));
}

#[tokio::test]
async fn test_cached_image_refreshes_on_access() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources(
        "cachedimage",
        vec![RemoteObject::new("img-1", "ubuntu").with_region("r1").with_status("active")],
    );
    cycle(&engine, &provider).await;
    let spec = engine.spec("cachedimage").unwrap();
    let cx = OpContext::system(&engine);

    // Fresh copies are served without asking the provider.
    driver.set_resources(
        "cachedimage",
        vec![RemoteObject::new("img-1", "ubuntu").with_region("r1").with_status("killed")],
    );
    let image = service::get(&cx, "cachedimage", "ubuntu").await.unwrap();
    assert_eq!(image.status, "active");

    let mut stale = engine.load(&spec, &image.id).await.unwrap();
    stale.last_ref_at = Some((chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339());
    engine.store.update_resource(&spec, &stale).await.unwrap();
    let image = service::get(&cx, "cachedimage", "ubuntu").await.unwrap();
    assert_eq!(image.status, "killed");

    // Gone remotely: the cached row takes the lost status.
    driver.set_resources("cachedimage", Vec::new());
    let mut stale = engine.load(&spec, &image.id).await.unwrap();
    stale.last_ref_at = Some((chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339());
    engine.store.update_resource(&spec, &stale).await.unwrap();
    let image = service::get(&cx, "cachedimage", "ubuntu").await.unwrap();
    assert_eq!(image.status, "deleted");
}

#[tokio::test]
async fn test_unsupported_policy_is_migrated_on_sync() {
    let (engine, driver, provider) = setup().await;
    let zone_spec = engine.spec("dns_zone").unwrap();
    let mut zone = ResourceRecord::new("dns_zone", "example.com");
    zone.domain_id = "default".to_string();
    zone.manager_id = Some(provider.id.clone());
    zone.external_id = "zone-1".to_string();
    zone.status = "available".to_string();
    zone.attributes.insert("zone_type".to_string(), json!("PublicZone"));
    engine.store.insert_resource(&zone_spec, &zone).await.unwrap();

    let cx = OpContext::system(&engine);
    let spec = engine.spec("dns_record").unwrap();
    let scope = SyncScope::new(provider, driver).child(&zone);
    let remote: RemoteHandle = Arc::new(
        RemoteObject::new("rec-1", "www")
            .with_attr("dns_type", json!("A"))
            .with_attr("dns_value", json!("192.0.2.10"))
            .with_attr("policy_type", json!("Weighted"))
            .with_attr("policy_value", json!("50")),
    );
    let result = sync_class(&cx, spec, scope, vec![remote], SyncOptions::full()).await;
    assert_eq!(result.added, 1);

    let record = only(&engine, "dns_record").await;
    assert_eq!(record.attr_str("policy_type"), Some("Simple"));
    assert_eq!(record.attr("policy_value"), None);

    let meta = engine.store.get_metadata("dns_record", &record.id).await.unwrap();
    let old: Value = serde_json::from_str(&meta["migrated_policy"]).unwrap();
    assert_eq!(old["policy_type"], "Weighted");
    assert_eq!(old["policy_value"], "50");
}

// ─── Provider actions ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_provider_sync_action_runs_as_task() {
    let (engine, driver, provider) = setup().await;
    driver.set_resources("global_network", vec![RemoteObject::new("gn-1", "backbone")]);
    let cx = OpContext::system(&engine);

    let outcome = service::perform_provider(&cx, &provider.name, "sync", json!({ "force": true }))
        .await
        .unwrap();
    finish(&engine, outcome.task_id).await;
    assert_eq!(only(&engine, "global_network").await.external_id, "gn-1");

    let provider = engine.providers.get(&provider.id).await.unwrap();
    assert_eq!(provider.sync_status, "idle");
    assert!(provider.last_sync_at.is_some());
    assert!(provider.last_sync_end_at.is_some());

    let member = OpContext::new(&engine, Identity::member("default", "p1"));
    let err = service::perform_provider(&member, &provider.name, "sync", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    let err = service::perform_provider(&cx, &provider.name, "explode", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_supported");
}

// ─── WAF ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_waf_type_must_be_offered_by_provider() {
    let (engine, driver, provider) = setup().await;
    driver.set_waf_types(&["cloud"]);
    cycle(&engine, &provider).await;
    let region = only(&engine, "cloudregion").await;
    let cx = OpContext::system(&engine);

    let mut input = CreateInput::new("edge-waf").with_attr("waf_type", json!("appliance"));
    input.manager_id = Some(provider.id.clone());
    input.region_id = Some(region.id.clone());
    let err = service::create(&cx, "waf_instance", input).await.unwrap_err();
    assert_eq!(err.code(), "not_supported");
    assert!(err.to_string().contains("appliance"));

    let mut input = CreateInput::new("edge-waf");
    input.manager_id = Some(provider.id.clone());
    let err = service::create(&cx, "waf_instance", input).await.unwrap_err();
    assert_eq!(err.code(), "missing_parameter");

    let mut input = CreateInput::new("edge-waf").with_attr("waf_type", json!("cloud"));
    input.manager_id = Some(provider.id.clone());
    input.region_id = Some(region.id.clone());
    let (waf, task_id) = service::create(&cx, "waf_instance", input).await.unwrap();
    finish(&engine, task_id).await;
    let waf = service::get(&cx, "waf_instance", &waf.id).await.unwrap();
    assert!(waf.is_external());

    // Local WAFs skip the provider type check.
    let input = CreateInput::new("lab-waf").with_attr("waf_type", json!("appliance"));
    assert!(service::create(&cx, "waf_instance", input).await.is_ok());
}
