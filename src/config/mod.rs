//! Configuration management.
//!
//! Settings come from an optional TOML file overlaid with `RESEARCH_FEDERATION_*`
//! environment variables (nested keys use `__`, e.g.
//! `RESEARCH_FEDERATION_API_KEYS__SCOPUS`). Every field has a default, so an
//! empty or missing file yields a usable configuration.
//!
//! ```toml
//! [api_keys]
//! scopus = "your-elsevier-key"
//! ncbi_email = "you@example.org"
//!
//! [rate_limits]
//! pubmed_requests_per_second = 3
//! scopus_requests_per_second = 9
//!
//! [quota]
//! scopus_weekly_limit = 20000
//!
//! [reconcile]
//! batch_size = 25
//! max_requests = 10
//!
//! [cache]
//! enabled = true
//! directory = "~/.cache/research-federation"
//! result_count_ttl_seconds = 86400
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::federation::ReconcileConfig;
use crate::sources::SCOPUS_WEEKLY_QUOTA;

const APP_DIR: &str = "research-federation";
const ENV_PREFIX: &str = "RESEARCH_FEDERATION";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API keys for the backends
    #[serde(default)]
    pub api_keys: ApiKeys,

    /// Client-side request pacing
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Request budget tracking
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Cross-backend reconciliation limits
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Persistent caches
    #[serde(default)]
    pub cache: CacheConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API keys for external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Elsevier API key, required for Scopus
    #[serde(default = "env_scopus_key")]
    pub scopus: Option<String>,

    /// Elsevier institutional token (optional)
    #[serde(default = "env_scopus_inst_token")]
    pub scopus_inst_token: Option<String>,

    /// NCBI E-utilities key (optional, raises the PubMed rate limit)
    #[serde(default = "env_ncbi_key")]
    pub ncbi: Option<String>,

    /// Contact address sent to NCBI
    #[serde(default = "env_ncbi_email")]
    pub ncbi_email: Option<String>,
}

impl Default for ApiKeys {
    fn default() -> Self {
        Self {
            scopus: env_scopus_key(),
            scopus_inst_token: env_scopus_inst_token(),
            ncbi: env_ncbi_key(),
            ncbi_email: env_ncbi_email(),
        }
    }
}

fn env_scopus_key() -> Option<String> {
    std::env::var("SCOPUS_API_KEY").ok()
}

fn env_scopus_inst_token() -> Option<String> {
    std::env::var("SCOPUS_INST_TOKEN").ok()
}

fn env_ncbi_key() -> Option<String> {
    std::env::var("NCBI_API_KEY").ok()
}

fn env_ncbi_email() -> Option<String> {
    std::env::var("NCBI_EMAIL").ok()
}

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second sent to PubMed (0 disables limiting)
    #[serde(default = "default_pubmed_rps")]
    pub pubmed_requests_per_second: u32,

    /// Requests per second sent to Scopus (0 disables limiting)
    #[serde(default = "default_scopus_rps")]
    pub scopus_requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            pubmed_requests_per_second: default_pubmed_rps(),
            scopus_requests_per_second: default_scopus_rps(),
        }
    }
}

fn default_pubmed_rps() -> u32 {
    3
}

fn default_scopus_rps() -> u32 {
    9
}

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Scopus requests assumed available before any response reports the real figure
    #[serde(default = "default_scopus_limit")]
    pub scopus_weekly_limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            scopus_weekly_limit: default_scopus_limit(),
        }
    }
}

fn default_scopus_limit() -> u64 {
    SCOPUS_WEEKLY_QUOTA
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist quota and result counts between runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory; the platform cache directory when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_count_ttl")]
    pub result_count_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            result_count_ttl_seconds: default_count_ttl(),
        }
    }
}

impl CacheConfig {
    /// The configured directory, or `<platform cache dir>/research-federation`
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join(APP_DIR)))
    }
}

fn default_true() -> bool {
    true
}

fn default_count_ttl() -> u64 {
    86_400 // 1 day
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for structured output, plain text otherwise
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// `<platform config dir>/research-federation/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Load configuration from `path` (which must exist) or from the default
/// location (which may be absent), then apply environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => builder = builder.add_source(config::File::from(path)),
        None => {
            if let Some(default) = default_config_path() {
                builder = builder.add_source(config::File::from(default).required(false));
            }
        }
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
