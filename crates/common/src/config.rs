use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info};

use crate::errors::{ConfigError, ConfigResult};

pub const DEFAULT_API_VERSION: &str = "58.0";
pub const DEFAULT_TOKEN_URL: &str = "https://login.salesforce.com/services/oauth2/token";

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Default,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub salesforce: SalesforceSettings,
    pub retry: RetrySettings,
    pub error_store: ErrorStoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SalesforceSettings {
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for SalesforceSettings {
    fn default() -> Self {
        Self {
            instance_url: None,
            access_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: 30,
        }
    }
}

impl SalesforceSettings {
    /// Refresh is possible only with the full credential triple
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Retry knobs in plain milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_jitter_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorStoreSettings {
    /// Base URL of the REST store; in-memory when unset
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub errors_table: String,
    pub logs_table: String,
}

impl Default for ErrorStoreSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            errors_table: "migration_errors".to_string(),
            logs_table: "migration_logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Check cross-field consistency
    pub fn validate(&self) -> ConfigResult<()> {
        let retry = &self.retry;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_multiplier".to_string(),
                reason: format!("must be >= 1.0, got {}", retry.backoff_multiplier),
            });
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.base_delay_ms".to_string(),
                reason: format!(
                    "base delay {}ms exceeds max delay {}ms",
                    retry.base_delay_ms, retry.max_delay_ms
                ),
            });
        }
        if let Some(url) = &self.salesforce.instance_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    field: "salesforce.instance_url".to_string(),
                    reason: format!("not an http(s) URL: {}", url),
                });
            }
        }
        if self.error_store.url.is_some() && self.error_store.api_key.is_none() {
            return Err(ConfigError::Missing("error_store.api_key".to_string()));
        }
        Ok(())
    }

    /// Salesforce settings needed to talk to an org.
    ///
    /// With the full refresh credentials the instance URL may be left out;
    /// the token response supplies it.
    pub fn require_salesforce(&self) -> ConfigResult<&SalesforceSettings> {
        if self.salesforce.can_refresh() {
            return Ok(&self.salesforce);
        }
        if self.salesforce.instance_url.is_none() {
            return Err(ConfigError::Missing("salesforce.instance_url".to_string()));
        }
        if self.salesforce.access_token.is_none() {
            return Err(ConfigError::Missing(
                "salesforce.access_token (or refresh_token + client_id + client_secret)"
                    .to_string(),
            ));
        }
        Ok(&self.salesforce)
    }
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: String,
    load_dotenv: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_paths: Self::default_config_paths(),
            env_prefix: "CRMIGRATE_".to_string(),
            load_dotenv: true,
        }
    }

    /// Search `path` before the default locations
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.config_paths.insert(0, path);
        self
    }

    /// Search only the given paths
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.config_paths = paths;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("crmigrate.toml"),
            PathBuf::from(".crmigrate.toml"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("crmigrate").join("config.toml"));
        }
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".config").join("crmigrate").join("config.toml"));
        }

        paths
    }

    /// Defaults, then the first config file found, then the environment
    pub async fn load(&self) -> ConfigResult<(AppConfig, ConfigSource)> {
        if self.load_dotenv {
            dotenv::dotenv().ok();
        }

        let (config, source) = self.load_file_config().await?;
        let config = self.apply_env_overrides(config, |key| env::var(key).ok())?;
        config.validate()?;

        Ok((config, source))
    }

    async fn load_file_config(&self) -> ConfigResult<(AppConfig, ConfigSource)> {
        let explicit = env::var(format!("{}CONFIG", self.env_prefix))
            .ok()
            .map(PathBuf::from);

        for path in explicit.iter().chain(self.config_paths.iter()) {
            if path.exists() {
                let config = Self::load_file(path).await?;
                info!("Loaded configuration from: {}", path.display());
                return Ok((config, ConfigSource::File(path.clone())));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok((AppConfig::default(), ConfigSource::Default))
    }

    pub async fn load_file(path: &Path) -> ConfigResult<AppConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment values; `lookup` is usually `env::var`
    pub fn apply_env_overrides<F>(&self, mut config: AppConfig, lookup: F) -> ConfigResult<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefixed = |name: &str| format!("{}{}", self.env_prefix, name);
        let first = |keys: &[String]| keys.iter().find_map(|k| lookup(k.as_str()).map(|v| (k.clone(), v)));

        let sf = &mut config.salesforce;
        let string_overrides: [(&mut Option<String>, &str, &str); 5] = [
            (&mut sf.instance_url, "SALESFORCE_INSTANCE_URL", "SF_INSTANCE_URL"),
            (&mut sf.access_token, "SALESFORCE_ACCESS_TOKEN", "SF_ACCESS_TOKEN"),
            (&mut sf.refresh_token, "SALESFORCE_REFRESH_TOKEN", "SF_REFRESH_TOKEN"),
            (&mut sf.client_id, "SALESFORCE_CLIENT_ID", "SF_CLIENT_ID"),
            (&mut sf.client_secret, "SALESFORCE_CLIENT_SECRET", "SF_CLIENT_SECRET"),
        ];
        for (slot, long, short) in string_overrides {
            if let Some((_, value)) = first(&[prefixed(long), long.to_string(), short.to_string()]) {
                *slot = Some(value);
            }
        }
        if let Some((_, value)) = first(&[prefixed("SALESFORCE_TOKEN_URL"), "SF_TOKEN_URL".into()]) {
            sf.token_url = value;
        }
        if let Some((_, value)) = first(&[prefixed("SALESFORCE_API_VERSION"), "SF_API_VERSION".into()]) {
            sf.api_version = value;
        }
        if let Some((key, value)) = first(&[prefixed("SALESFORCE_TIMEOUT_SECS")]) {
            sf.timeout_secs = parse_env(&key, &value)?;
        }

        let retry = &mut config.retry;
        if let Some((key, value)) = first(&[prefixed("MAX_RETRIES")]) {
            retry.max_retries = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = first(&[prefixed("BASE_DELAY_MS")]) {
            retry.base_delay_ms = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = first(&[prefixed("MAX_DELAY_MS")]) {
            retry.max_delay_ms = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = first(&[prefixed("BACKOFF_MULTIPLIER")]) {
            retry.backoff_multiplier = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = first(&[prefixed("MAX_JITTER_MS")]) {
            retry.max_jitter_ms = parse_env(&key, &value)?;
        }

        let store = &mut config.error_store;
        if let Some((_, value)) = first(&[prefixed("ERROR_STORE_URL"), "SUPABASE_URL".into()]) {
            store.url = Some(value);
        }
        if let Some((_, value)) = first(&[prefixed("ERROR_STORE_KEY"), "SUPABASE_ANON_KEY".into()]) {
            store.api_key = Some(value);
        }

        if let Some((_, value)) = first(&[prefixed("LOG_LEVEL")]) {
            config.logging.level = value;
        }
        if let Some((key, value)) = first(&[prefixed("LOG_JSON")]) {
            config.logging.json = parse_env(&key, &value)?;
        }

        Ok(config)
    }

    /// Logging settings from the environment alone, so logging can start
    /// before the configuration is loaded. Unparsable values keep defaults.
    pub fn logging_settings<F>(&self, lookup: F) -> LoggingSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = LoggingSettings::default();
        if let Some(level) = lookup(&format!("{}LOG_LEVEL", self.env_prefix)) {
            settings.level = level;
        }
        if let Some(json) = lookup(&format!("{}LOG_JSON", self.env_prefix)) {
            settings.json = json.trim().parse().unwrap_or(settings.json);
        }
        settings
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.salesforce.api_version, "58.0");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.error_store.errors_table, "migration_errors");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let loader = ConfigLoader::new().without_dotenv();
        let lookup = lookup_from(&[
            ("SF_INSTANCE_URL", "https://acme.my.salesforce.com"),
            ("CRMIGRATE_SALESFORCE_ACCESS_TOKEN", "00Dxx!token"),
            ("SF_ACCESS_TOKEN", "ignored"),
            ("CRMIGRATE_MAX_RETRIES", "5"),
            ("CRMIGRATE_BACKOFF_MULTIPLIER", "1.5"),
            ("CRMIGRATE_LOG_JSON", "true"),
        ]);

        let config = loader
            .apply_env_overrides(AppConfig::default(), lookup)
            .expect("overrides should apply");

        assert_eq!(
            config.salesforce.instance_url.as_deref(),
            Some("https://acme.my.salesforce.com")
        );
        assert_eq!(config.salesforce.access_token.as_deref(), Some("00Dxx!token"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_multiplier, 1.5);
        assert!(config.logging.json);
    }

    #[test]
    fn test_logging_settings_from_env() {
        let loader = ConfigLoader::new().without_dotenv();
        let settings = loader.logging_settings(lookup_from(&[
            ("CRMIGRATE_LOG_LEVEL", "debug"),
            ("CRMIGRATE_LOG_JSON", "true"),
            ("CRMIGRATE_MAX_RETRIES", "many"),
        ]));
        assert_eq!(settings.level, "debug");
        assert!(settings.json);

        let settings = loader.logging_settings(lookup_from(&[("CRMIGRATE_LOG_JSON", "yes")]));
        assert_eq!(settings, LoggingSettings::default());
    }

    #[test]
    fn test_invalid_env_value() {
        let loader = ConfigLoader::new().without_dotenv();
        let result = loader.apply_env_overrides(
            AppConfig::default(),
            lookup_from(&[("CRMIGRATE_MAX_RETRIES", "many")]),
        );
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_retry() {
        let mut config = AppConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_salesforce() {
        let mut config = AppConfig::default();
        assert!(config.require_salesforce().is_err());

        config.salesforce.instance_url = Some("https://acme.my.salesforce.com".into());
        assert!(config.require_salesforce().is_err());

        config.salesforce.refresh_token = Some("refresh".into());
        config.salesforce.client_id = Some("id".into());
        config.salesforce.client_secret = Some("secret".into());
        assert!(config.require_salesforce().is_ok());
    }

    #[test]
    fn test_refresh_credentials_without_instance_url() {
        let mut config = AppConfig::default();
        config.salesforce.refresh_token = Some("refresh".into());
        config.salesforce.client_id = Some("id".into());
        assert!(matches!(
            config.require_salesforce(),
            Err(ConfigError::Missing(field)) if field == "salesforce.instance_url"
        ));

        config.salesforce.client_secret = Some("secret".into());
        let settings = config.require_salesforce().expect("refresh credentials suffice");
        assert!(settings.instance_url.is_none());

        let mut token_only = AppConfig::default();
        token_only.salesforce.access_token = Some("00Dxx!token".into());
        assert!(matches!(
            token_only.require_salesforce(),
            Err(ConfigError::Missing(field)) if field == "salesforce.instance_url"
        ));
    }
}
