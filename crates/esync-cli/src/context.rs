//! Shared command plumbing
//!
//! Resolves the configuration file, applies environment overrides and turns
//! the `source` / `destination` store sections into live adapters. Access
//! tokens are read once from the environment and handed to the store
//! constructors; nothing below this module looks them up again.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use esync_cache::{DatabasePool, SqliteJobRepository};
use esync_core::config::{Config, Credentials, PersistenceConfig, StoreConfig};
use esync_core::ports::{IFileStore, ThrottleObserver};
use esync_egnyte::EgnyteStore;
use esync_engine::memory::MemoryStore;
use esync_graph::SharePointStore;
use tracing::{debug, info};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global flags every command sees
#[derive(Debug, Clone)]
pub struct CliContext {
    pub format: OutputFormat,
    pub quiet: bool,
    config_override: Option<PathBuf>,
}

impl CliContext {
    pub fn new(format: OutputFormat, quiet: bool, config_override: Option<PathBuf>) -> Self {
        Self {
            format,
            quiet,
            config_override,
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    /// `--config` if given, otherwise the platform default
    pub fn config_path(&self) -> PathBuf {
        self.config_override
            .clone()
            .unwrap_or_else(Config::default_path)
    }

    /// Loads the config file (defaults when it does not exist) and applies
    /// environment overrides
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path();
        let mut config = if path.exists() {
            Config::load(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Builds the adapter for one side of the sync
///
/// HTTP adapters report the throttling they wait out in place to `throttle`.
pub fn build_store(
    side: &str,
    store: &StoreConfig,
    credentials: &Credentials,
    throttle: Option<Arc<dyn ThrottleObserver>>,
) -> Result<Arc<dyn IFileStore>> {
    let built: Arc<dyn IFileStore> = match store {
        StoreConfig::Egnyte(cfg) => {
            let token = credentials
                .egnyte_access_token
                .clone()
                .with_context(|| format!("EGNYTE_ACCESS_TOKEN is not set ({side} store)"))?;
            let mut built = EgnyteStore::from_config(cfg, token)
                .with_context(|| format!("Invalid Egnyte settings for {side}"))?;
            if let Some(observer) = throttle {
                built = built.with_throttle_observer(observer);
            }
            Arc::new(built)
        }
        StoreConfig::Sharepoint(cfg) => {
            let token = credentials
                .sharepoint_access_token
                .clone()
                .with_context(|| format!("SHAREPOINT_ACCESS_TOKEN is not set ({side} store)"))?;
            let mut built = SharePointStore::from_config(cfg, token)
                .with_context(|| format!("Invalid SharePoint settings for {side}"))?;
            if let Some(observer) = throttle {
                built = built.with_throttle_observer(observer);
            }
            Arc::new(built)
        }
        StoreConfig::Memory(cfg) => match &cfg.fixture {
            Some(fixture) => Arc::new(MemoryStore::from_fixture(side, fixture)?),
            None => Arc::new(MemoryStore::new(side)),
        },
    };
    info!(side, kind = store.kind(), "Store ready");
    Ok(built)
}

/// Opens the job database, or `None` when persistence is disabled
pub async fn open_repository(config: &PersistenceConfig) -> Result<Option<Arc<SqliteJobRepository>>> {
    if !config.enabled {
        return Ok(None);
    }
    let pool = DatabasePool::new(&config.database_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open job database at {}",
                config.database_path.display()
            )
        })?;
    Ok(Some(Arc::new(SqliteJobRepository::new(pool.pool().clone()))))
}
