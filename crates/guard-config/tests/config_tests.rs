use guard_config::{Config, ConfigError, ConfigManager};
use rust_decimal_macros::dec;
use tempfile::tempdir;

#[test]
fn default_config_matches_documented_tunables() {
    let cfg = Config::default();

    assert_eq!(cfg.cache_ttl_seconds, 300);
    assert_eq!(cfg.session_timeout_seconds, 300);
    assert_eq!(cfg.slow_query_threshold_ms, 2_000);
    assert_eq!(cfg.amount_tolerance, dec!(0.01));
    assert_eq!(cfg.lookback_years, 2);
    assert_eq!(cfg.audit_retention_days, 730);
    assert_eq!(cfg.cleanup_max_attempts, 2);
    assert_eq!(cfg.ledger_table, "ledger");
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_manager_persists_and_loads_config() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::new(dir.path().join("config.json"), dir.path().join("backups"));

    let mut cfg = Config::default();
    cfg.cache_ttl_seconds = 60;
    cfg.amount_tolerance = dec!(0.05);
    cfg.owned_artifact_hosts = vec!["files.example.com".into()];

    manager.save(&cfg).expect("save config");
    let loaded = manager.load().expect("load config");

    assert_eq!(loaded, cfg);
    assert!(!dir.path().join("config.json.tmp").exists());
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).expect("manager");
    std::fs::write(manager.config_path(), r#"{ "session_timeout_seconds": 45 }"#).unwrap();

    let loaded = manager.load().expect("load config");
    assert_eq!(loaded.session_timeout_seconds, 45);
    assert_eq!(loaded.cache_ttl_seconds, 300);
    assert_eq!(loaded.amount_tolerance, dec!(0.01));
}

#[test]
fn invalid_values_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).expect("manager");

    let mut cfg = Config::default();
    cfg.amount_tolerance = dec!(0);
    assert!(matches!(manager.save(&cfg), Err(ConfigError::Invalid(_))));

    std::fs::write(manager.config_path(), r#"{ "ledger_table": "  " }"#).unwrap();
    assert!(matches!(manager.load(), Err(ConfigError::Invalid(_))));

    std::fs::write(manager.config_path(), r#"{ "ledger_table": "ledger-a" }"#).unwrap();
    assert!(matches!(manager.load(), Err(ConfigError::Invalid(_))));

    std::fs::write(manager.config_path(), "{ not json").unwrap();
    assert!(matches!(manager.load(), Err(ConfigError::Serde(_))));
}

#[test]
fn artifact_api_host_counts_as_owned() {
    let mut cfg = Config::default();
    cfg.owned_artifact_hosts = vec![" Store ".into()];
    cfg.artifact_api_base_url = Some("https://files.example.com:8443/api".into());

    assert_eq!(cfg.owned_hosts(), vec!["store", "files.example.com"]);

    cfg.artifact_api_base_url = Some("ftp://files.example.com".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn backups_round_trip_and_list_newest_first() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).expect("manager");

    let mut cfg = Config::default();
    cfg.lookback_years = 3;
    let name = manager.backup(&cfg, Some("Before audit")).expect("backup");
    assert!(name.starts_with("config_"));
    assert!(name.ends_with("_before-audit.json"));

    let listed = manager.list_backups().expect("list");
    assert_eq!(listed, vec![name.clone()]);

    let restored = manager.restore(&name).expect("restore");
    assert_eq!(restored.lookback_years, 3);
    assert!(manager.restore("config_missing.json").is_err());
}

#[test]
fn restore_rejects_names_outside_backups_dir() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).expect("manager");
    manager.save(&Config::default()).expect("save");

    for name in ["../config.json", "backups/../../config/config.json"] {
        assert!(matches!(
            manager.restore(name),
            Err(ConfigError::Invalid(_))
        ));
    }
}

#[test]
fn storage_root_defaults_under_base_dir() {
    let dir = tempdir().expect("tempdir");
    let cfg = Config::default();
    assert_eq!(cfg.resolve_storage_root(dir.path()), dir.path().join("storage"));
}
