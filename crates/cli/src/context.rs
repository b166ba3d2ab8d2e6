use anyhow::{bail, Context, Result};
use common::{AppConfig, ConfigLoader, ConfigSource};
use resilience::{ErrorStore, InMemoryErrorStore, RestErrorStore, RetryConfig, RetryExecutor};
use salesforce::SalesforceClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Effective configuration plus the services built from it
pub struct AppContext {
    pub config: AppConfig,
    pub source: ConfigSource,
}

impl AppContext {
    pub async fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = config_path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            loader = loader.with_path(path);
        }

        let (config, source) = loader.load().await.context("Failed to load configuration")?;
        debug!("Configuration source: {:?}", source);
        Ok(Self { config, source })
    }

    /// REST ledger when configured, otherwise an in-process one
    pub fn error_store(&self) -> Result<Arc<dyn ErrorStore>> {
        if self.config.error_store.url.is_some() {
            let store = RestErrorStore::from_settings(&self.config.error_store)?;
            return Ok(Arc::new(store));
        }
        warn!("No error store configured; migration errors are kept in memory for this run");
        Ok(Arc::new(InMemoryErrorStore::new()))
    }

    /// Errors can only be listed or resolved against a persistent ledger
    pub fn persistent_error_store(&self) -> Result<Arc<dyn ErrorStore>> {
        if self.config.error_store.url.is_none() {
            bail!("No error store configured (set error_store.url or CRMIGRATE_ERROR_STORE_URL)");
        }
        self.error_store()
    }

    pub fn executor(&self) -> Result<RetryExecutor> {
        let config = RetryConfig::from(&self.config.retry);
        Ok(RetryExecutor::new(config, self.error_store()?))
    }

    pub async fn salesforce(&self) -> Result<SalesforceClient> {
        let settings = self.config.require_salesforce()?;
        let client = SalesforceClient::connect(settings)
            .await
            .context("Failed to connect to Salesforce")?;
        info!("Connected to {}", client.instance_url().await);
        Ok(client)
    }
}
