use super::*;

#[test]
fn default_config_validates() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.dedup_window_minutes, 10);
    assert_eq!(config.session_retention_hours, 24);
}

#[test]
fn rejects_invalid_default_channel_name() {
    let mut config = Config::default();
    config.default_channels.global.push(NamedChannel {
        name: "Bad Name".to_string(),
        description: String::new(),
        is_default: true,
    });
    assert!(config.validate().is_err());
}

#[test]
fn rejects_negative_dedup_window() {
    let mut config = Config::default();
    config.dedup_window_minutes = -1;
    assert!(config.validate().is_err());
}

#[test]
fn rejects_self_referential_project_link() {
    let mut config = Config::default();
    config.project_links.push(ProjectLinkConfig {
        source: "proj1".to_string(),
        target: "proj1".to_string(),
        link_type: LinkType::Bidirectional,
        enabled: true,
    });
    assert!(config.validate().is_err());
}

#[test]
fn rejects_unknown_semantic_profile() {
    let mut config = Config::default();
    config.semantic.default_profile = "made-up".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn save_then_load_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = Config::default();
    config.dedup_window_minutes = 5;
    config.default_channels.global.push(NamedChannel {
        name: "general".to_string(),
        description: "general chat".to_string(),
        is_default: true,
    });
    save_config(&config, Some(&path)).unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.dedup_window_minutes, 5);
    assert_eq!(loaded.default_channels.global.len(), 1);
    assert_eq!(loaded.default_channels.global[0].name, "general");
}

#[test]
fn missing_file_yields_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");
    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.dedup_window_minutes, 10);
}
