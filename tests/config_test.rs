use cloudmirror::config::loader::{load_config, parse_config, DEFAULT_CONFIG};
use cloudmirror::config::validator::validate;

#[test]
fn test_parse_full_config() {
    let yaml = r#"
database:
  path: "/var/lib/cloudmirror/state.db"
workers: 4
sync:
  cooldown_secs: 60
  error_limit: 8
  xor: true
netprep:
  gateway_last_octet: 254
quotas:
  dns_zone: 50
  vpc: 10
providers:
  - name: "lab"
    brand: "snapshot"
    endpoint: "https://lab.example.com"
  - name: "prod"
    brand: "snapshot"
    domain_id: "d2"
    project_src: "cloud"
    sync_cooldown_secs: 900
"#;

    let config = parse_config(yaml).expect("Should parse full config");
    assert_eq!(config.database.path, "/var/lib/cloudmirror/state.db");
    assert_eq!(config.workers, 4);
    assert_eq!(config.sync.cooldown_secs, 60);
    assert_eq!(config.sync.error_limit, 8);
    assert!(config.sync.xor);
    assert_eq!(config.netprep.gateway_last_octet, 254);
    assert_eq!(config.quota_limit("dns_zone"), Some(50));
    assert_eq!(config.quota_limit("bucket"), None);

    assert_eq!(config.providers.len(), 2);
    let lab = &config.providers[0];
    assert_eq!(lab.domain_id, "default");
    assert_eq!(lab.project_src, "local");
    assert_eq!(lab.sync_cooldown_secs, None);
    let prod = &config.providers[1];
    assert_eq!(prod.domain_id, "d2");
    assert_eq!(prod.project_src, "cloud");
    assert_eq!(prod.sync_cooldown_secs, Some(900));
}

#[test]
fn test_parse_minimal_config() {
    let config = parse_config("workers: 2\n").expect("Should parse minimal config");
    assert_eq!(config.workers, 2);
    assert_eq!(config.database.path, ".cloudmirror/state.db");
    assert_eq!(config.sync.cooldown_secs, 300);
    assert_eq!(config.netprep.gateway_last_octet, 1);
    assert!(config.providers.is_empty());

    let empty = parse_config("").expect("Empty config uses defaults");
    assert_eq!(empty.workers, 10);
}

#[test]
fn test_parse_invalid_yaml() {
    let result = parse_config("workers: [unclosed");
    assert!(result.is_err());
}

#[test]
fn test_validate_settings() {
    let err = parse_config("workers: 0\n").unwrap_err();
    assert!(err.to_string().contains("workers"));

    let err = parse_config("netprep:\n  gateway_last_octet: 255\n").unwrap_err();
    assert!(err.to_string().contains("gateway_last_octet"));

    let err = parse_config("quotas:\n  vpc: -1\n").unwrap_err();
    assert!(err.to_string().contains("vpc"));
}

#[test]
fn test_validate_providers() {
    let yaml = r#"
providers:
  - name: "lab"
    brand: "snapshot"
  - name: "lab"
    brand: "snapshot"
"#;
    let err = parse_config(yaml).unwrap_err();
    assert!(err.to_string().contains("more than once"));

    let yaml = r#"
providers:
  - name: "lab"
    brand: "snapshot"
    project_src: "elsewhere"
"#;
    let err = parse_config(yaml).unwrap_err();
    assert!(err.to_string().contains("elsewhere"));

    let mut config = parse_config("").unwrap();
    config.providers.push(
        serde_yaml::from_str("name: \"\"\nbrand: \"snapshot\"\n").unwrap(),
    );
    assert!(validate(&config).is_err());
}

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.yaml");
    std::fs::write(&path, "workers: 3\nsync:\n  cooldown_secs: 5\n").unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(config.workers, 3);
    assert_eq!(config.sync.cooldown().as_secs(), 5);

    let missing = dir.path().join("missing.yaml");
    let err = load_config(missing.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Config not found"));
}

#[test]
fn test_default_config_name_may_be_absent() {
    let dir = tempfile::tempdir().unwrap();
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let config = load_config(DEFAULT_CONFIG);
    std::env::set_current_dir(previous).unwrap();
    assert_eq!(config.unwrap().workers, 10);
}
