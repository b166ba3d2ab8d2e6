use common::{AppConfig, ConfigError, ConfigLoader, ConfigSource};
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[tokio::test]
#[serial]
async fn test_load_from_file() {
    let file = write_config(
        r#"
[salesforce]
instance_url = "https://acme.my.salesforce.com"
access_token = "token"
api_version = "58.0"

[retry]
max_retries = 4
base_delay_ms = 250

[logging]
level = "debug"
"#,
    );

    let loader = ConfigLoader::new()
        .without_dotenv()
        .with_env_prefix("CRMIGRATE_TEST_A_")
        .with_paths(vec![file.path().to_path_buf()]);

    let (config, source) = loader.load().await.expect("config should load");

    assert_eq!(source, ConfigSource::File(file.path().to_path_buf()));
    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.base_delay_ms, 250);
    // untouched sections keep their defaults
    assert_eq!(config.retry.max_delay_ms, 30_000);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.error_store.logs_table, "migration_logs");
}

#[tokio::test]
#[serial]
async fn test_missing_file_falls_back_to_defaults() {
    let loader = ConfigLoader::new()
        .without_dotenv()
        .with_env_prefix("CRMIGRATE_TEST_B_")
        .with_paths(vec!["/nonexistent/crmigrate.toml".into()]);

    let (config, source) = loader.load().await.expect("defaults should load");
    assert_eq!(source, ConfigSource::Default);
    assert_eq!(config.retry, AppConfig::default().retry);
}

#[tokio::test]
#[serial]
async fn test_env_overrides_file() {
    let file = write_config("[retry]\nmax_retries = 1\n");
    std::env::set_var("CRMIGRATE_TEST_C_MAX_RETRIES", "6");

    let loader = ConfigLoader::new()
        .without_dotenv()
        .with_env_prefix("CRMIGRATE_TEST_C_")
        .with_paths(vec![file.path().to_path_buf()]);
    let result = loader.load().await;

    std::env::remove_var("CRMIGRATE_TEST_C_MAX_RETRIES");

    let (config, _) = result.expect("config should load");
    assert_eq!(config.retry.max_retries, 6);
}

#[tokio::test]
#[serial]
async fn test_malformed_file_is_reported() {
    let file = write_config("[retry\nmax_retries = ");

    let loader = ConfigLoader::new()
        .without_dotenv()
        .with_env_prefix("CRMIGRATE_TEST_D_")
        .with_paths(vec![file.path().to_path_buf()]);

    match loader.load().await {
        Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {:?}", other),
    }
}
