use std::sync::Arc;

use serde_json::json;

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::identity::{Identity, ScopeLevel};
use cloudmirror::query::input::{ListInput, ManagedFilter};
use cloudmirror::resources::service;
use cloudmirror::state::models::ResourceRecord;
use cloudmirror::state::sqlite::SqliteBackend;

async fn engine() -> Arc<Engine> {
    let backend = SqliteBackend::open_memory().unwrap();
    Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap()
}

async fn insert(engine: &Arc<Engine>, record: &ResourceRecord) {
    let spec = engine.spec(&record.class).unwrap();
    engine.store.insert_resource(&spec, record).await.unwrap();
}

fn zone(domain: &str, name: &str) -> ResourceRecord {
    let mut record = ResourceRecord::new("dns_zone", name);
    record.domain_id = domain.to_string();
    record.status = "available".to_string();
    record.attributes.insert("zone_type".to_string(), json!("PublicZone"));
    record
}

fn record_in(zone: &ResourceRecord, name: &str) -> ResourceRecord {
    let mut record = ResourceRecord::new("dns_record", name);
    record.parent_id = Some(zone.id.clone());
    record.status = "available".to_string();
    record.attributes.insert("dns_type".to_string(), json!("A"));
    record.attributes.insert("dns_value".to_string(), json!("10.0.0.1"));
    record
}

fn bucket(domain: &str, project: &str, name: &str, region: &str) -> ResourceRecord {
    let mut record = ResourceRecord::new("bucket", name);
    record.domain_id = domain.to_string();
    record.project_id = project.to_string();
    record.region_id = Some(region.to_string());
    record.status = "available".to_string();
    record
}

fn names(data: &[serde_json::Value]) -> Vec<String> {
    data.iter()
        .map(|row| row["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_owner_filter_follows_parent_chain() {
    let engine = engine().await;
    let ours = zone("d1", "ours.example");
    let theirs = zone("d2", "theirs.example");
    insert(&engine, &ours).await;
    insert(&engine, &theirs).await;
    insert(&engine, &record_in(&ours, "www")).await;
    insert(&engine, &record_in(&ours, "mail")).await;
    insert(&engine, &record_in(&theirs, "api")).await;

    let cx = OpContext::new(&engine, Identity::domain_admin("d1"));
    let zones = service::list(&cx, "dns_zone", &ListInput::default()).await.unwrap();
    assert_eq!(names(&zones.data), vec!["ours.example"]);

    let records = service::list(&cx, "dns_record", &ListInput::default()).await.unwrap();
    assert_eq!(records.total, 2);
    let mut found = names(&records.data);
    found.sort();
    assert_eq!(found, vec!["mail", "www"]);

    // A domain with no records sees nothing, including inherited children.
    let stranger = OpContext::new(&engine, Identity::domain_admin("d3"));
    assert_eq!(service::list(&stranger, "dns_zone", &ListInput::default()).await.unwrap().total, 0);
    assert_eq!(service::list(&stranger, "dns_record", &ListInput::default()).await.unwrap().total, 0);

    let system = OpContext::system(&engine);
    assert_eq!(service::list(&system, "dns_record", &ListInput::default()).await.unwrap().total, 3);
}

#[tokio::test]
async fn test_member_sees_own_project_only() {
    let engine = engine().await;
    insert(&engine, &bucket("d1", "p1", "logs", "r1")).await;
    insert(&engine, &bucket("d1", "p2", "backups", "r1")).await;

    let member = OpContext::new(&engine, Identity::member("d1", "p1"));
    let listed = service::list(&member, "bucket", &ListInput::default()).await.unwrap();
    assert_eq!(names(&listed.data), vec!["logs"]);

    let wider = ListInput {
        scope: Some(ScopeLevel::Domain),
        ..ListInput::default()
    };
    let err = service::list(&member, "bucket", &wider).await.unwrap_err();
    assert_eq!(err.code(), "forbidden");

    let admin = OpContext::new(&engine, Identity::domain_admin("d1"));
    assert_eq!(service::list(&admin, "bucket", &ListInput::default()).await.unwrap().total, 2);
}

#[tokio::test]
async fn test_parent_managed_and_external_filters() {
    let engine = engine().await;
    let mut managed = bucket("d1", "p1", "remote", "r1");
    managed.manager_id = Some("prov-1".to_string());
    managed.external_id = "b-1".to_string();
    insert(&engine, &managed).await;
    insert(&engine, &bucket("d1", "p1", "local", "r2")).await;

    let a = zone("d1", "a.example");
    let b = zone("d1", "b.example");
    insert(&engine, &a).await;
    insert(&engine, &b).await;
    insert(&engine, &record_in(&a, "www")).await;
    insert(&engine, &record_in(&b, "ftp")).await;

    let cx = OpContext::system(&engine);

    let by_parent = ListInput {
        parent_id: Some(b.id.clone()),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "dns_record", &by_parent).await.unwrap();
    assert_eq!(names(&listed.data), vec!["ftp"]);

    let by_provider = ListInput {
        managed: ManagedFilter::provider("prov-1"),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &by_provider).await.unwrap();
    assert_eq!(names(&listed.data), vec!["remote"]);

    let by_region = ListInput {
        managed: ManagedFilter {
            region_ids: vec!["r2".to_string()],
            ..ManagedFilter::default()
        },
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &by_region).await.unwrap();
    assert_eq!(names(&listed.data), vec!["local"]);

    let local_only = ListInput {
        external: Some(false),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &local_only).await.unwrap();
    assert_eq!(names(&listed.data), vec!["local"]);

    let external = ListInput {
        external: Some(true),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &external).await.unwrap();
    assert_eq!(names(&listed.data), vec!["remote"]);
}

#[tokio::test]
async fn test_order_by_child_count() {
    let engine = engine().await;
    let quiet = zone("d1", "quiet.example");
    let busy = zone("d1", "busy.example");
    let empty = zone("d1", "empty.example");
    insert(&engine, &quiet).await;
    insert(&engine, &busy).await;
    insert(&engine, &empty).await;
    insert(&engine, &record_in(&quiet, "www")).await;
    for name in ["a", "b", "c"] {
        insert(&engine, &record_in(&busy, name)).await;
    }

    let cx = OpContext::system(&engine);
    let input = ListInput {
        order_by: vec!["-dns_record_count".to_string()],
        ..ListInput::default()
    };
    let listed = service::list(&cx, "dns_zone", &input).await.unwrap();
    assert_eq!(
        names(&listed.data),
        vec!["busy.example", "quiet.example", "empty.example"]
    );

    let unknown = ListInput {
        order_by: vec!["bogus_count".to_string()],
        ..ListInput::default()
    };
    let err = service::list(&cx, "dns_zone", &unknown).await.unwrap_err();
    assert_eq!(err.code(), "input_parameter");
}

#[tokio::test]
async fn test_export_keys_limit_columns() {
    let engine = engine().await;
    let z = zone("d1", "corp.example");
    insert(&engine, &z).await;
    let cx = OpContext::system(&engine);

    let input = ListInput {
        export_keys: vec!["name".to_string(), "zone_type".to_string()],
        ..ListInput::default()
    };
    let listed = service::list(&cx, "dns_zone", &input).await.unwrap();
    assert_eq!(listed.data.len(), 1);
    let row = listed.data[0].as_object().unwrap();
    let mut keys: Vec<&String> = row.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["name", "zone_type"]);
    assert_eq!(row["zone_type"], "PublicZone");

    let bad = ListInput {
        export_keys: vec!["secret".to_string()],
        ..ListInput::default()
    };
    assert_eq!(
        service::list(&cx, "dns_zone", &bad).await.unwrap_err().code(),
        "input_parameter"
    );
}

#[tokio::test]
async fn test_paging_reports_unpaged_total() {
    let engine = engine().await;
    for i in 0..5 {
        insert(&engine, &bucket("d1", "p1", &format!("b{}", i), "r1")).await;
    }
    let cx = OpContext::system(&engine);
    let input = ListInput {
        order_by: vec!["name".to_string()],
        limit: Some(2),
        offset: Some(2),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &input).await.unwrap();
    assert_eq!(listed.total, 5);
    assert_eq!(names(&listed.data), vec!["b2", "b3"]);
}

#[tokio::test]
async fn test_offset_without_limit_skips_rows() {
    let engine = engine().await;
    for i in 0..5 {
        insert(&engine, &bucket("d1", "p1", &format!("b{}", i), "r1")).await;
    }
    let cx = OpContext::system(&engine);
    let input = ListInput {
        order_by: vec!["name".to_string()],
        offset: Some(3),
        ..ListInput::default()
    };
    let listed = service::list(&cx, "bucket", &input).await.unwrap();
    assert_eq!(listed.total, 5);
    assert_eq!(names(&listed.data), vec!["b3", "b4"]);
}
