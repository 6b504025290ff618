use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map};
use tempfile::TempDir;

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::Engine;
use cloudmirror::registry::catalog;
use cloudmirror::state::backend::StateBackend;
use cloudmirror::state::export::{format_rows, OutputFormat};
use cloudmirror::state::models::{NameScope, ResourceRecord, TaskFilter, TaskRecord};
use cloudmirror::state::sqlite::SqliteBackend;

async fn file_engine(dir: &TempDir) -> Arc<Engine> {
    let path = dir.path().join("state").join("mirror.db");
    let backend = SqliteBackend::open(path.to_str().unwrap()).unwrap();
    Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap()
}

fn network(name: &str) -> ResourceRecord {
    let mut record = ResourceRecord::new("global_network", name);
    record.domain_id = "default".to_string();
    record
}

async fn bare_backend() -> SqliteBackend {
    let backend = SqliteBackend::open_memory().unwrap();
    let registry = catalog::builtin(Duration::from_secs(3600)).unwrap();
    backend.initialize(&registry).await.unwrap();
    backend
}

#[tokio::test]
async fn test_initialize_is_repeatable() {
    let backend = SqliteBackend::open_memory().unwrap();
    let registry = catalog::builtin(Duration::from_secs(3600)).unwrap();
    backend.initialize(&registry).await.unwrap();
    backend.initialize(&registry).await.unwrap();

    let rows = backend
        .query_raw("SELECT MAX(version) AS version FROM schema_version")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let spec;
    let id;
    {
        let engine = file_engine(&dir).await;
        spec = engine.spec("global_network").unwrap();
        let mut record = network("backbone");
        record.attributes.insert("mtu".to_string(), json!(9000));
        id = record.id.clone();
        engine.store.insert_resource(&spec, &record).await.unwrap();
    }

    let engine = file_engine(&dir).await;
    let loaded = engine.load(&spec, &id).await.unwrap();
    assert_eq!(loaded.name, "backbone");
    assert_eq!(loaded.class, "global_network");
    assert_eq!(loaded.attributes.get("mtu"), Some(&json!(9000)));
}

#[tokio::test]
async fn test_update_status_and_tombstone() {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let spec = engine.spec("global_network").unwrap();

    let mut record = network("backbone");
    engine.store.insert_resource(&spec, &record).await.unwrap();

    record.description = "core".to_string();
    record.enabled = false;
    engine.store.update_resource(&spec, &record).await.unwrap();
    engine
        .store
        .set_status(&spec, &record.id, "unknown", "lost contact")
        .await
        .unwrap();

    let loaded = engine.load(&spec, &record.id).await.unwrap();
    assert_eq!(loaded.description, "core");
    assert!(!loaded.enabled);
    assert_eq!(loaded.status, "unknown");
    assert_eq!(loaded.status_reason, "lost contact");

    let names = engine
        .store
        .live_names(&spec, &NameScope::default())
        .await
        .unwrap();
    assert!(names.contains("backbone"));

    engine.store.mark_deleted(&spec, &record.id).await.unwrap();
    assert!(engine.store.get_resource(&spec, &record.id).await.unwrap().is_none());
    assert!(engine.load(&spec, &record.id).await.unwrap_err().is_not_found());
    let names = engine
        .store
        .live_names(&spec, &NameScope::default())
        .await
        .unwrap();
    assert!(names.is_empty());
}

#[tokio::test]
async fn test_duplicate_external_id_conflicts() {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let spec = engine.spec("global_network").unwrap();

    let mut first = network("a");
    first.external_id = "gn-1".to_string();
    first.manager_id = Some("p1".to_string());
    engine.store.insert_resource(&spec, &first).await.unwrap();

    let mut second = network("b");
    second.external_id = "gn-1".to_string();
    second.manager_id = Some("p1".to_string());
    let err = engine.store.insert_resource(&spec, &second).await.unwrap_err();
    assert_eq!(err.code(), "conflict");

    // A tombstone frees the external id.
    engine.store.mark_deleted(&spec, &first.id).await.unwrap();
    engine.store.insert_resource(&spec, &second).await.unwrap();
}

#[tokio::test]
async fn test_metadata_prefix_replace() {
    let backend = bare_backend().await;

    backend.set_metadata("vpc", "v1", "user:owner", "ops").await.unwrap();
    backend.set_metadata("vpc", "v1", "ext:env", "prod").await.unwrap();
    backend.set_metadata("vpc", "v1", "ext:team", "net").await.unwrap();

    let mut tags = BTreeMap::new();
    tags.insert("env".to_string(), "staging".to_string());
    backend.replace_metadata("vpc", "v1", "ext:", &tags).await.unwrap();

    let meta = backend.get_metadata("vpc", "v1").await.unwrap();
    assert_eq!(meta.len(), 2);
    assert_eq!(meta.get("user:owner").map(String::as_str), Some("ops"));
    assert_eq!(meta.get("ext:env").map(String::as_str), Some("staging"));

    backend.delete_metadata("vpc", "v1").await.unwrap();
    assert!(backend.get_metadata("vpc", "v1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relations_link_and_purge() {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let relation = engine.registry.relation("dns_zone_vpc").unwrap();

    let mut attrs = Map::new();
    attrs.insert("region".to_string(), json!("r1"));
    engine.store.add_relation(relation, "z1", "v1", &attrs).await.unwrap();
    engine.store.add_relation(relation, "z1", "v1", &attrs).await.unwrap();
    engine.store.add_relation(relation, "z1", "v2", &Map::new()).await.unwrap();
    engine.store.add_relation(relation, "z2", "v1", &Map::new()).await.unwrap();

    let rows = engine.store.list_relations(relation, Some("z1"), None).await.unwrap();
    assert_eq!(rows.len(), 2);
    let v1 = rows.iter().find(|r| r.right_id == "v1").unwrap();
    assert_eq!(v1.attributes.get("region"), Some(&json!("r1")));

    engine.store.remove_relation(relation, "z1", "v2").await.unwrap();
    assert_eq!(engine.store.purge_relations(relation, "v1").await.unwrap(), 2);
    assert!(engine.store.list_relations(relation, None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_task_rows_and_cancel_flag() {
    let backend = bare_backend().await;
    let task = TaskRecord::new("ResourceDeleteTask", "vpc", "v1", "main");
    backend.insert_task(&task).await.unwrap();

    assert!(backend.request_cancel(&task.id).await.unwrap());
    assert!(!backend.request_cancel("missing").await.unwrap());

    let mut loaded = backend.get_task(&task.id).await.unwrap().unwrap();
    assert!(loaded.cancel_requested);
    assert_eq!(loaded.status, "queued");

    loaded.status = "done".to_string();
    backend.update_task(&loaded).await.unwrap();
    let done = backend
        .list_tasks(&TaskFilter {
            status: Some("done".to_string()),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert!(done[0].cancel_requested);
}

#[test]
fn test_format_rows() {
    let rows = vec![
        json!({ "name": "a", "status": "available", "note": null }),
        json!({ "name": "b,c", "status": "deleting", "note": "x" }),
    ];

    let table = format_rows(&rows, OutputFormat::Table).unwrap();
    assert!(table.starts_with("NAME"));
    assert!(table.contains("(2 rows)"));

    let csv = format_rows(&rows, OutputFormat::Csv).unwrap();
    assert!(csv.starts_with("name,note,status\n"));
    assert!(csv.contains("a,-,available\n"));
    assert!(csv.contains("\"b,c\",x,deleting\n"));

    let json = format_rows(&[], OutputFormat::parse("JSON")).unwrap();
    assert_eq!(json, "[]");
    assert_eq!(format_rows(&[], OutputFormat::Table).unwrap(), "No results.");
}
