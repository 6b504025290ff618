use std::net::Ipv4Addr;
use std::sync::Arc;

use serde_json::json;

use cloudmirror::config::types::EngineConfig;
use cloudmirror::engine::Engine;
use cloudmirror::netprep::{pool_from_store, IpRangePool, NetConf, NetPrep};
use cloudmirror::state::models::ResourceRecord;
use cloudmirror::state::sqlite::SqliteBackend;

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn conf(start: &str, end: &str, gateway: &str) -> NetConf {
    NetConf {
        guest_ip_start: start.to_string(),
        guest_ip_end: end.to_string(),
        guest_ip_mask: 24,
        guest_gateway: gateway.to_string(),
    }
}

#[test]
fn test_pool_lookup_by_address() {
    let mut pool = IpRangePool::new();
    pool.insert(ip("10.0.0.10"), ip("10.0.0.20"), "net-a");
    pool.insert(ip("10.0.1.100"), ip("10.0.1.50"), "net-b");

    assert_eq!(pool.len(), 2);
    assert_eq!(pool.get(ip("10.0.0.10")).unwrap().id, "net-a");
    assert_eq!(pool.get(ip("10.0.0.20")).unwrap().id, "net-a");
    assert!(!pool.contains(ip("10.0.0.21")));
    assert!(!pool.contains(ip("10.0.0.9")));
    // Reversed bounds are normalized.
    assert_eq!(pool.get(ip("10.0.1.75")).unwrap().id, "net-b");
}

#[test]
fn test_host_runs_stay_within_their_slash_24() {
    let mut prep = NetPrep::new(IpRangePool::new(), 1);
    let confs = prep.suggest_hosts(&[
        ip("10.0.0.9"),
        ip("10.0.0.5"),
        ip("10.0.0.6"),
        ip("10.0.0.255"),
        ip("10.0.1.0"),
        ip("10.0.0.6"),
    ]);
    assert_eq!(
        confs,
        vec![
            conf("10.0.0.5", "10.0.0.6", "10.0.0.1"),
            conf("10.0.0.9", "10.0.0.9", "10.0.0.1"),
            conf("10.0.0.255", "10.0.0.255", "10.0.0.1"),
            conf("10.0.1.0", "10.0.1.0", "10.0.1.1"),
        ]
    );
    assert!(prep.pool().contains(ip("10.0.0.6")));
    assert!(!prep.pool().contains(ip("10.0.0.7")));
}

#[test]
fn test_host_runs_skip_covered_addresses() {
    let mut pool = IpRangePool::new();
    pool.insert(ip("10.0.0.10"), ip("10.0.0.20"), "net-a");
    let mut prep = NetPrep::new(pool, 254);

    let confs = prep.suggest_hosts(&[ip("10.0.0.9"), ip("10.0.0.10"), ip("10.0.0.21")]);
    assert_eq!(
        confs,
        vec![
            conf("10.0.0.9", "10.0.0.9", "10.0.0.254"),
            conf("10.0.0.21", "10.0.0.21", "10.0.0.254"),
        ]
    );
    assert!(prep.suggest_hosts(&[ip("10.0.0.21")]).is_empty());
}

#[test]
fn test_suggestion_stops_at_existing_network() {
    let mut pool = IpRangePool::new();
    pool.insert(ip("10.0.0.10"), ip("10.0.0.20"), "net-a");
    let mut prep = NetPrep::new(pool, 1);

    let confs = prep.suggest(&[ip("10.0.0.5")]);
    assert_eq!(confs, vec![conf("10.0.0.1", "10.0.0.9", "10.0.0.1")]);

    let confs = prep.suggest(&[ip("10.0.0.30")]);
    assert_eq!(confs, vec![conf("10.0.0.21", "10.0.0.254", "10.0.0.1")]);
}

#[test]
fn test_occupied_addresses_bound_the_run() {
    let mut prep = NetPrep::new(IpRangePool::new(), 254);
    prep.occupy(ip("192.168.5.40"));
    prep.occupy(ip("192.168.5.60"));

    let confs = prep.suggest(&[ip("192.168.5.50"), ip("192.168.5.60")]);
    assert_eq!(confs, vec![conf("192.168.5.41", "192.168.5.254", "192.168.5.254")]);
}

#[test]
fn test_covered_addresses_need_no_suggestion() {
    let mut pool = IpRangePool::new();
    pool.insert(ip("10.1.0.1"), ip("10.1.0.254"), "net-a");
    let mut prep = NetPrep::new(pool, 1);

    assert!(prep.suggest(&[ip("10.1.0.7"), ip("10.1.0.200")]).is_empty());

    let confs = prep.suggest(&[ip("10.2.0.7"), ip("10.2.0.9")]);
    assert_eq!(confs.len(), 1);
    assert!(prep.suggest(&[ip("10.2.0.100")]).is_empty());
    assert_eq!(prep.pool().len(), 2);
}

#[tokio::test]
async fn test_pool_is_seeded_from_networks() {
    let backend = SqliteBackend::open_memory().unwrap();
    let engine = Engine::new(EngineConfig::default(), Arc::new(backend))
        .await
        .unwrap();
    let spec = engine.spec("network").unwrap();

    let mut ranged = ResourceRecord::new("network", "ranged");
    ranged.domain_id = "default".to_string();
    ranged.project_id = "system".to_string();
    ranged
        .attributes
        .insert("guest_ip_start".to_string(), json!("172.16.0.10"));
    ranged
        .attributes
        .insert("guest_ip_end".to_string(), json!("172.16.0.99"));
    engine.store.insert_resource(&spec, &ranged).await.unwrap();

    let mut bare = ResourceRecord::new("network", "bare");
    bare.domain_id = "default".to_string();
    bare.project_id = "system".to_string();
    engine.store.insert_resource(&spec, &bare).await.unwrap();

    let pool = pool_from_store(&engine).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get(ip("172.16.0.50")).unwrap().id, ranged.id);
}
