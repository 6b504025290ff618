//! Command-line tests driving the `cloudmirror` binary against a temp state
//! database and a snapshot inventory file.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const INVENTORY: &str = r#"
regions:
  - global_id: r1
    name: region-one
resources:
  global_network:
    - global_id: gn-1
      name: backbone
    - global_id: gn-2
      name: edge
      status: creating
"#;

/// Builds a `cloudmirror` Command with an isolated work dir and state database.
fn mirror_cmd(work_dir: &Path) -> Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("cloudmirror");
    cmd.current_dir(work_dir)
        .arg("--db")
        .arg(work_dir.join("state.db"))
        .env("NO_COLOR", "1");
    cmd
}

fn add_snapshot_provider(work: &TempDir, name: &str) {
    let inventory = work.path().join(format!("{}.yaml", name));
    std::fs::write(&inventory, INVENTORY).unwrap();
    mirror_cmd(work.path())
        .args(["provider", "add", name, "--endpoint"])
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Registered provider {}", name)));
}

#[test]
fn test_init_registers_configured_providers() {
    let work = TempDir::new().unwrap();
    let config = work.path().join("mirror.yaml");
    std::fs::write(
        &config,
        "providers:\n  - name: lab\n    brand: snapshot\n",
    )
    .unwrap();

    mirror_cmd(work.path())
        .arg("-c")
        .arg(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered 1 provider(s)"))
        .stdout(predicate::str::contains("State database ready"));
    assert!(work.path().join("state.db").exists());

    // Seeding is idempotent.
    mirror_cmd(work.path())
        .arg("-c")
        .arg(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered").count(0));

    mirror_cmd(work.path())
        .args(["provider", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lab"))
        .stdout(predicate::str::contains("snapshot"));
}

#[test]
fn test_invalid_config_fails() {
    let work = TempDir::new().unwrap();
    let config = work.path().join("bad.yaml");
    std::fs::write(&config, "workers: 0\n").unwrap();

    mirror_cmd(work.path())
        .arg("-c")
        .arg(&config)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers"));
}

#[test]
fn test_sync_then_list() {
    let work = TempDir::new().unwrap();
    add_snapshot_provider(&work, "lab");

    mirror_cmd(work.path())
        .args(["sync", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("global_network"))
        .stdout(predicate::str::contains("2 added"));

    mirror_cmd(work.path())
        .args(["list", "global_network", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backbone"))
        .stdout(predicate::str::contains("gn-2"));

    mirror_cmd(work.path())
        .args(["list", "global_network", "--search", "edge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("edge"))
        .stdout(predicate::str::contains("backbone").not());

    // Inside the cooldown an unforced sync is skipped.
    mirror_cmd(work.path())
        .args(["sync", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));

    mirror_cmd(work.path())
        .args(["show", "global_network", "backbone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resource:"))
        .stdout(predicate::str::contains("available"));
}

#[test]
fn test_disabled_provider_refuses_sync() {
    let work = TempDir::new().unwrap();
    add_snapshot_provider(&work, "lab");

    mirror_cmd(work.path())
        .args(["provider", "disable", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Provider lab disabled"));

    mirror_cmd(work.path())
        .args(["sync", "lab", "--force"])
        .assert()
        .failure();
}

#[test]
fn test_create_and_delete_local_zone() {
    let work = TempDir::new().unwrap();
    let body = r#"{"name": "Corp.Example", "attributes": {"zone_type": "PublicZone"}}"#;

    mirror_cmd(work.path())
        .args(["create", "dns_zone", body])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    mirror_cmd(work.path())
        .args(["show", "dns_zone", "corp.example", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"zone_type\": \"PublicZone\""));

    mirror_cmd(work.path())
        .args(["delete", "dns_zone", "corp.example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));

    mirror_cmd(work.path())
        .args(["show", "dns_zone", "corp.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not_found"));
}

#[test]
fn test_malformed_record_is_refused() {
    let work = TempDir::new().unwrap();
    let zone = r#"{"name": "corp.example", "attributes": {"zone_type": "PublicZone"}}"#;
    mirror_cmd(work.path())
        .args(["create", "dns_zone", zone])
        .assert()
        .success();

    let record = r#"{"name": "www", "parent_id": "corp.example", "attributes": {"dns_type": "A", "dns_value": "not-an-ip"}}"#;
    mirror_cmd(work.path())
        .args(["create", "dns_record", record])
        .assert()
        .failure()
        .stderr(predicate::str::contains("input_parameter"));
}

#[test]
fn test_classes_lists_catalog() {
    let work = TempDir::new().unwrap();
    mirror_cmd(work.path())
        .arg("classes")
        .assert()
        .success()
        .stdout(predicate::str::contains("dns_record"))
        .stdout(predicate::str::contains("kube_cluster"))
        .stdout(predicate::str::contains("sync-recordsets"));
}

#[test]
fn test_netprep_suggests_networks() {
    let work = TempDir::new().unwrap();
    mirror_cmd(work.path())
        .args(["netprep", "10.0.0.5", "--expand", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.1,10.0.0.254,24,10.0.0.1"));

    mirror_cmd(work.path())
        .args(["netprep", "10.0.0.5", "10.0.0.6", "10.0.0.9", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.5,10.0.0.6,24,10.0.0.1"))
        .stdout(predicate::str::contains("10.0.0.9,10.0.0.9,24,10.0.0.1"))
        .stdout(predicate::str::contains("10.0.0.254").not());

    mirror_cmd(work.path())
        .args(["netprep", "10.0.0.300"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not an IPv4 address"));
}

#[test]
fn test_schedule_and_tick() {
    let work = TempDir::new().unwrap();
    let body = r#"{"name": "backbone"}"#;
    mirror_cmd(work.path())
        .args(["create", "global_network", body])
        .assert()
        .success();

    mirror_cmd(work.path())
        .args([
            "schedule",
            "nightly",
            "global_network",
            "backbone",
            "disable",
            "--timer",
            r#"{"cycle": "week", "hour": 2, "minute": 30, "weekdays": [2, 4]}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("weekly on [2, 4] at 02:30"));

    mirror_cmd(work.path())
        .args([
            "schedule",
            "broken",
            "global_network",
            "backbone",
            "disable",
            "--timer",
            r#"{"cycle": "day", "hour": 25}"#,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hour"));

    mirror_cmd(work.path())
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing due."));
}

#[test]
fn test_tasks_lists_delete_task() {
    let work = TempDir::new().unwrap();
    mirror_cmd(work.path())
        .args(["create", "global_network", r#"{"name": "backbone"}"#])
        .assert()
        .success();
    mirror_cmd(work.path())
        .args(["delete", "global_network", "backbone"])
        .assert()
        .success();

    mirror_cmd(work.path())
        .args(["tasks", "--status", "done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ResourceDeleteTask"));
}
