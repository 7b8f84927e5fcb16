//! Configuration module for esync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, environment overrides and a builder
//! pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for esync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub rate_limits: RateLimitsConfig,
    /// Store files are read from.
    pub source: StoreConfig,
    /// Store files are written to.
    pub destination: StoreConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

/// Transfer engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default worker pool size when a request does not set one.
    pub concurrency_limit: usize,
    /// Upload chunk size in bytes; must be a multiple of 320 KiB.
    pub chunk_size_bytes: u64,
    /// Modification times closer than this are considered equal.
    pub mtime_tolerance_secs: u64,
}

/// Retry and backoff settings for transient transfer failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

/// Per-provider request rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub source_reads_per_minute: u32,
    pub source_read_burst: u32,
    pub destination_writes_per_minute: u32,
    pub destination_write_burst: u32,
}

/// Which file store backs one side of the sync, and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Egnyte(EgnyteConfig),
    Sharepoint(SharePointConfig),
    Memory(MemoryStoreConfig),
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Egnyte(_) => "egnyte",
            StoreConfig::Sharepoint(_) => "sharepoint",
            StoreConfig::Memory(_) => "memory",
        }
    }
}

/// Egnyte public API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgnyteConfig {
    /// Tenant subdomain, i.e. `{domain}.egnyte.com`.
    pub domain: String,
    /// Override for the API host (tests, proxies).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Entries requested per listing page.
    pub page_size: u32,
    pub timeout_secs: u64,
}

/// SharePoint document library (Graph drive) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharePointConfig {
    /// Site hosting the library; informational when `drive_id` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    /// Graph drive id of the document library.
    pub drive_id: String,
    /// Override for the Graph endpoint (tests, national clouds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

/// In-memory store used for mock mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// JSON fixture describing the initial tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

/// Job persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub database_path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/esync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("esync")
            .join("config.yaml")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// `EGNYTE_DOMAIN` sets the domain of every Egnyte side;
    /// `SHAREPOINT_SITE_ID` and `SHAREPOINT_DRIVE_ID` do the same for
    /// SharePoint sides. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for store in [&mut self.source, &mut self.destination] {
            match store {
                StoreConfig::Egnyte(cfg) => {
                    if let Some(domain) = get("EGNYTE_DOMAIN") {
                        cfg.domain = domain;
                    }
                }
                StoreConfig::Sharepoint(cfg) => {
                    if let Some(site_id) = get("SHAREPOINT_SITE_ID") {
                        cfg.site_id = Some(site_id);
                    }
                    if let Some(drive_id) = get("SHAREPOINT_DRIVE_ID") {
                        cfg.drive_id = drive_id;
                    }
                }
                StoreConfig::Memory(_) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            source: StoreConfig::Egnyte(EgnyteConfig::default()),
            destination: StoreConfig::Sharepoint(SharePointConfig::default()),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Graph requires upload chunks in multiples of 320 KiB.
pub const CHUNK_ALIGNMENT: u64 = 320 * 1024;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            chunk_size_bytes: 32 * CHUNK_ALIGNMENT, // 10 MiB
            mtime_tolerance_secs: 2,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            source_reads_per_minute: 600,
            source_read_burst: 20,
            destination_writes_per_minute: 600,
            destination_write_burst: 20,
        }
    }
}

impl Default for EgnyteConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            base_url: None,
            page_size: 100,
            timeout_secs: 60,
        }
    }
}

impl Default for SharePointConfig {
    fn default() -> Self {
        Self {
            site_id: None,
            drive_id: String::new(),
            base_url: None,
            page_size: 200,
            timeout_secs: 60,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("esync");
        Self {
            enabled: true,
            database_path: data_dir.join("jobs.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Provider access tokens, read once at startup and injected into stores.
#[derive(Clone, Default)]
pub struct Credentials {
    pub egnyte_access_token: Option<String>,
    pub sharepoint_access_token: Option<String>,
}

impl Credentials {
    /// Read `EGNYTE_ACCESS_TOKEN` and `SHAREPOINT_ACCESS_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            egnyte_access_token: get("EGNYTE_ACCESS_TOKEN"),
            sharepoint_access_token: get("SHAREPOINT_ACCESS_TOKEN"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("egnyte_access_token", &redact(&self.egnyte_access_token))
            .field("sharepoint_access_token", &redact(&self.sharepoint_access_token))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"engine.concurrency_limit"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

fn validate_store(errors: &mut Vec<ValidationError>, side: &str, store: &StoreConfig) {
    match store {
        StoreConfig::Egnyte(cfg) => {
            if cfg.domain.trim().is_empty() && cfg.base_url.is_none() {
                errors.push(ValidationError {
                    field: format!("{side}.domain"),
                    message: "required (or set EGNYTE_DOMAIN)".into(),
                });
            }
            positive(errors, &format!("{side}.page_size"), cfg.page_size.into());
            positive(errors, &format!("{side}.timeout_secs"), cfg.timeout_secs);
        }
        StoreConfig::Sharepoint(cfg) => {
            if cfg.drive_id.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{side}.drive_id"),
                    message: "required (or set SHAREPOINT_DRIVE_ID)".into(),
                });
            }
            if cfg.page_size == 0 || cfg.page_size > 999 {
                errors.push(ValidationError {
                    field: format!("{side}.page_size"),
                    message: "must be in range 1..=999".into(),
                });
            }
            positive(errors, &format!("{side}.timeout_secs"), cfg.timeout_secs);
        }
        StoreConfig::Memory(cfg) => {
            if let Some(fixture) = &cfg.fixture {
                if !fixture.exists() {
                    errors.push(ValidationError {
                        field: format!("{side}.fixture"),
                        message: format!("file does not exist: {}", fixture.display()),
                    });
                }
            }
        }
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- engine ---
        if self.engine.concurrency_limit == 0 || self.engine.concurrency_limit > 64 {
            errors.push(ValidationError {
                field: "engine.concurrency_limit".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.engine.chunk_size_bytes == 0 || self.engine.chunk_size_bytes % CHUNK_ALIGNMENT != 0
        {
            errors.push(ValidationError {
                field: "engine.chunk_size_bytes".into(),
                message: format!(
                    "must be a positive multiple of {CHUNK_ALIGNMENT} bytes (320 KiB)"
                ),
            });
        }

        // --- retry ---
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push(ValidationError {
                field: "retry.max_delay_ms".into(),
                message: format!(
                    "max_delay_ms ({}) must not be less than base_delay_ms ({})",
                    self.retry.max_delay_ms, self.retry.base_delay_ms
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            errors.push(ValidationError {
                field: "retry.jitter_factor".into(),
                message: "must be in range 0.0..=1.0".into(),
            });
        }

        // --- rate_limits ---
        positive(
            &mut errors,
            "rate_limits.source_reads_per_minute",
            self.rate_limits.source_reads_per_minute.into(),
        );
        positive(
            &mut errors,
            "rate_limits.source_read_burst",
            self.rate_limits.source_read_burst.into(),
        );
        positive(
            &mut errors,
            "rate_limits.destination_writes_per_minute",
            self.rate_limits.destination_writes_per_minute.into(),
        );
        positive(
            &mut errors,
            "rate_limits.destination_write_burst",
            self.rate_limits.destination_write_burst.into(),
        );

        // --- stores ---
        validate_store(&mut errors, "source", &self.source);
        validate_store(&mut errors, "destination", &self.destination);

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use esync_core::config::{ConfigBuilder, MemoryStoreConfig, StoreConfig};
///
/// let config = ConfigBuilder::new()
///     .source(StoreConfig::Memory(MemoryStoreConfig::default()))
///     .destination(StoreConfig::Memory(MemoryStoreConfig::default()))
///     .concurrency_limit(8)
///     .max_retries(5)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- engine ---

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.engine.concurrency_limit = n;
        self
    }

    pub fn chunk_size_bytes(mut self, bytes: u64) -> Self {
        self.config.engine.chunk_size_bytes = bytes;
        self
    }

    pub fn mtime_tolerance_secs(mut self, secs: u64) -> Self {
        self.config.engine.mtime_tolerance_secs = secs;
        self
    }

    // --- retry ---

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.retry.jitter_factor = factor;
        self
    }

    // --- rate_limits ---

    pub fn source_reads_per_minute(mut self, n: u32) -> Self {
        self.config.rate_limits.source_reads_per_minute = n;
        self
    }

    pub fn destination_writes_per_minute(mut self, n: u32) -> Self {
        self.config.rate_limits.destination_writes_per_minute = n;
        self
    }

    // --- stores ---

    pub fn source(mut self, store: StoreConfig) -> Self {
        self.config.source = store;
        self
    }

    pub fn destination(mut self, store: StoreConfig) -> Self {
        self.config.destination = store;
        self
    }

    // --- persistence ---

    pub fn persistence_enabled(mut self, enabled: bool) -> Self {
        self.config.persistence.enabled = enabled;
        self
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.persistence.database_path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
