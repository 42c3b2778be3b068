use pretty_assertions::assert_eq;
use tempfile::TempDir;
use threadlens_core::RescanPolicy;
use threadlens_engine::ThreadlensConfig;

#[test]
fn partial_ron_keeps_defaults_for_missing_fields() {
    let config = ThreadlensConfig::from_ron_str(
        r#"(
            search: (timeout_ms: 2500, default_provider: "secondary"),
            chat: (model: "gemini-2.0-flash"),
            discovery: (rescan: MutatedSubtrees),
        )"#,
    )
    .unwrap();

    assert_eq!(config.search.timeout_ms, 2500);
    assert_eq!(config.search.default_provider, "secondary");
    assert_eq!(config.search.default_limit, 5);
    assert_eq!(config.chat.model, "gemini-2.0-flash");
    assert_eq!(config.chat.timeout_ms, 60_000);
    assert_eq!(config.fetch.request_timeout_ms, 15_000);
    assert_eq!(config.discovery.rescan, RescanPolicy::MutatedSubtrees);
}

#[test]
fn missing_file_means_defaults() {
    let temp = TempDir::new().unwrap();
    let config = ThreadlensConfig::load(&temp.path().join("absent.ron")).unwrap();
    assert_eq!(config, ThreadlensConfig::default());
}

#[test]
fn saved_config_loads_back() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("threadlens.ron");
    let mut config = ThreadlensConfig::default();
    config.search.default_limit = 7;
    config.fetch.max_bytes = 1024;

    config.save(&path).unwrap();
    assert_eq!(ThreadlensConfig::load(&path).unwrap(), config);
}

#[test]
fn malformed_ron_is_reported() {
    assert!(ThreadlensConfig::from_ron_str("(search: (timeout_ms: \"soon\"))").is_err());
}
