use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::{HealthThresholds, OrchestratorConfig};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::pool::{CircuitBreakerConfig, PoolConfig, Scheme};

pub mod edgerc;

pub use edgerc::EdgeCredentials;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Credential file (default: ~/.edgerc)
    #[serde(default = "default_edgerc_path")]
    pub edgerc_path: String,

    /// Credential section (default: default)
    #[serde(default = "default_section")]
    pub section: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry budget for callers layered above the orchestrator
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Tenant override sent as the account-switch-key header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_switch_key: Option<String>,

    /// Hand out a pooled signer wrapping the EdgeGrid signer
    #[serde(default = "default_wrap_signer")]
    pub wrap_signer: bool,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub health: HealthThresholds,
}

fn default_edgerc_path() -> String {
    "~/.edgerc".to_string()
}

fn default_section() -> String {
    "default".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_wrap_signer() -> bool {
    true
}

impl Config {
    /// Create a configuration with every default applied
    pub fn new() -> Self {
        Self {
            edgerc_path: default_edgerc_path(),
            section: default_section(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            account_switch_key: None,
            wrap_signer: default_wrap_signer(),
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthThresholds::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Orchestrator settings for requests against `hostname`
    pub fn orchestrator_config(&self, hostname: impl Into<String>) -> OrchestratorConfig {
        OrchestratorConfig {
            hostname: hostname.into(),
            protocol: Scheme::Https,
            timeout: self.timeout(),
            account_switch_key: self.account_switch_key.clone(),
            wrap_signer: self.wrap_signer,
            pool: self.pool.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            health: self.health.clone(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Every variable is optional:
/// - EDGERC (credential file path)
/// - EDGERC_SECTION
/// - EDGEPOOL_TIMEOUT_MS
/// - EDGEPOOL_RETRY_ATTEMPTS
/// - AKAMAI_ACCOUNT_SWITCH_KEY
/// - EDGEPOOL_WRAP_SIGNER (true/false)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::new();

    if let Ok(path) = std::env::var("EDGERC") {
        config.edgerc_path = path;
    }

    if let Ok(section) = std::env::var("EDGERC_SECTION") {
        config.section = section;
    }

    if let Ok(timeout) = std::env::var("EDGEPOOL_TIMEOUT_MS") {
        config.timeout_ms = timeout
            .parse()
            .context(format!("Invalid EDGEPOOL_TIMEOUT_MS: {}", timeout))?;
    }

    if let Ok(retries) = std::env::var("EDGEPOOL_RETRY_ATTEMPTS") {
        config.retry_attempts = retries
            .parse()
            .context(format!("Invalid EDGEPOOL_RETRY_ATTEMPTS: {}", retries))?;
    }

    config.account_switch_key = std::env::var("AKAMAI_ACCOUNT_SWITCH_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty());

    if let Ok(wrap) = std::env::var("EDGEPOOL_WRAP_SIGNER") {
        config.wrap_signer = wrap
            .parse()
            .context(format!("Invalid EDGEPOOL_WRAP_SIGNER: {}", wrap))?;
    }

    Ok(config)
}

/// Load configuration from file or environment
///
/// A YAML file wins when given; otherwise the environment is read.
/// `section` overrides the credential section from either source.
pub fn load_config(config_path: Option<&str>, section: Option<&str>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => load_from_yaml(path)?,
        None => load_from_env()?,
    };

    if let Some(section) = section {
        config.section = section.to_string();
    }

    Ok(config)
}
