use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::fs;
use tempfile::tempdir;
use trackdedup::catalog::ContainerFormat;
use trackdedup::config::{Config, ConfigError, ENV_PREFIX};

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .extract()
        .unwrap();
    assert_eq!(config.io_threads, 4);
    assert_eq!(config.catalog.list_limit, 20_000);
    assert!((config.coverage_threshold - 0.80).abs() < f64::EPSILON);
    assert!((config.similarity_threshold - 0.75).abs() < f64::EPSILON);
    assert!(config.coverage_required);
    assert!(config.fuzzy_fallback);
}

#[test]
fn test_config_load_from_env() {
    std::env::set_var("TRACKDEDUP_API__RETRIES", "7");
    std::env::set_var("TRACKDEDUP_WORKSPACE__FINGERPRINT_FIELD", "Digest");

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .unwrap();

    assert_eq!(config.api.retries, 7);
    assert_eq!(config.workspace.fingerprint_field, "Digest");

    std::env::remove_var("TRACKDEDUP_API__RETRIES");
    std::env::remove_var("TRACKDEDUP_WORKSPACE__FINGERPRINT_FIELD");
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
io_threads = 8
coverage_threshold = 0.9
fuzzy_fallback = false

[catalog]
url = "http://catalog.local:41595/api"
list_limit = 50000

[workspace.path_fields]
flac = "Lossless Path"
"#,
    )
    .unwrap();

    let config = Config::load(Some(&config_path)).unwrap();

    assert_eq!(config.io_threads, 8);
    assert!((config.coverage_threshold - 0.9).abs() < f64::EPSILON);
    assert!(!config.fuzzy_fallback);
    assert_eq!(config.catalog.list_limit, 50_000);
    assert_eq!(
        config.catalog_url().unwrap().host_str(),
        Some("catalog.local")
    );

    let schema = config.record_schema().unwrap();
    assert_eq!(
        schema.path_fields.get(&ContainerFormat::Flac).map(String::as_str),
        Some("Lossless Path")
    );
    // Tables merge key by key: the other default fields survive.
    assert!(schema.path_fields.contains_key(&ContainerFormat::Mp3));
}

#[test]
fn test_toml_layer_overrides_defaults_only_where_set() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[api]\ntimeout_secs = 30\n").unwrap();

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .extract()
        .unwrap();

    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.api.retries, Config::default().api.retries);
    assert_eq!(config.io_threads, 4);
}

#[test]
fn test_invalid_threshold_in_file_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "coverage_threshold = 1.5\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            key: "coverage_threshold",
            ..
        }
    ));
}

#[test]
fn test_malformed_file_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "io_threads = \"many\"\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, ConfigError::Extract(_)));
}

#[test]
fn test_printed_config_loads_back() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let original = Config::default();
    fs::write(&config_path, original.to_toml().unwrap()).unwrap();

    let loaded: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .extract()
        .unwrap();
    assert_eq!(loaded, original);
}
