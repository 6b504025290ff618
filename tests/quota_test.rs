use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::state::sqlite::SqliteBackend;

async fn engine_with_zone_limit(limit: i64) -> Arc<Engine> {
    let mut quotas = BTreeMap::new();
    quotas.insert("dns_zone".to_string(), limit);
    let config = EngineConfig {
        quotas,
        ..EngineConfig::default()
    };
    let backend = SqliteBackend::open_memory().unwrap();
    Engine::new(config, Arc::new(backend)).await.unwrap()
}

fn zone(name: &str) -> CreateInput {
    CreateInput::new(name).with_attr("zone_type", json!("PublicZone"))
}

#[tokio::test]
async fn test_create_beyond_limit_is_refused() {
    let engine = engine_with_zone_limit(2).await;
    let cx = OpContext::system(&engine);

    service::create(&cx, "dns_zone", zone("a.example")).await.unwrap();
    service::create(&cx, "dns_zone", zone("b.example")).await.unwrap();
    let usage = engine.quotas.usage("default", "dns_zone").await.unwrap();
    assert_eq!(usage.used, 2);
    assert_eq!(usage.pending, 0);

    let err = service::create(&cx, "dns_zone", zone("c.example")).await.unwrap_err();
    assert_eq!(err.code(), "out_of_quota");
    let usage = engine.quotas.usage("default", "dns_zone").await.unwrap();
    assert_eq!(usage.used, 2);
}

#[tokio::test]
async fn test_delete_releases_quota() {
    let engine = engine_with_zone_limit(1).await;
    let cx = OpContext::system(&engine);

    let (first, _) = service::create(&cx, "dns_zone", zone("a.example")).await.unwrap();
    let task_id = service::delete(&cx, "dns_zone", &first.id).await.unwrap();
    if let Some(task_id) = task_id {
        let task = engine.tasks.wait_for(&engine, &task_id).await.unwrap();
        assert_eq!(task.status, "done", "{:?}", task.failed_reasons);
    }
    assert_eq!(engine.quotas.usage("default", "dns_zone").await.unwrap().used, 0);

    service::create(&cx, "dns_zone", zone("b.example")).await.unwrap();
}

#[tokio::test]
async fn test_failed_validation_reserves_nothing() {
    let engine = engine_with_zone_limit(1).await;
    let cx = OpContext::system(&engine);

    let err = service::create(&cx, "dns_zone", zone("not a domain!"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "input_parameter");
    let usage = engine.quotas.usage("default", "dns_zone").await.unwrap();
    assert_eq!(usage.used + usage.pending, 0);

    service::create(&cx, "dns_zone", zone("a.example")).await.unwrap();
}

#[tokio::test]
async fn test_unlimited_resource_counts_usage() {
    let engine = engine_with_zone_limit(10).await;
    assert_eq!(engine.quotas.limit("dns_zone"), Some(10));
    assert_eq!(engine.quotas.limit("vpc"), None);

    for _ in 0..3 {
        engine.quotas.reserve("d1", "vpc").await.unwrap();
    }
    engine.quotas.commit("d1", "vpc").await.unwrap();
    engine.quotas.cancel_pending("d1", "vpc").await.unwrap();

    let usage = engine.quotas.usage("d1", "vpc").await.unwrap();
    assert_eq!(usage.used, 1);
    assert_eq!(usage.pending, 1);
    assert_eq!(engine.quotas.usage("d2", "vpc").await.unwrap().used, 0);
}
