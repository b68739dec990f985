//! Configuration types for kvmap
//!
//! Loaded from TOML. Every section and field has a default, so a missing
//! file or a partial file is valid.

use crate::error::{Error, Result};
use crate::policy::WritePolicy;
use crate::types::Expiration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    /// Base write policy every template-built policy starts from
    #[must_use]
    pub fn base_write_policy(&self) -> WritePolicy {
        WritePolicy::builder(&WritePolicy::default())
            .send_key(self.write.send_key)
            .expiration(self.write.default_expiration)
            .build()
    }
}

/// Store connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace (database) all keys live in
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Seed hosts, `host:port`
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Per-request timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub fail_if_not_connected: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            hosts: default_hosts(),
            timeout_ms: default_timeout_ms(),
            fail_if_not_connected: true,
        }
    }
}

/// Defaults applied to every write
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Store the user key with each record
    #[serde(default = "default_true")]
    pub send_key: bool,
    #[serde(default)]
    pub default_expiration: Expiration,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            send_key: true,
            default_expiration: Expiration::NamespaceDefault,
        }
    }
}

/// Template behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Maximum in-flight requests for fan-out batch operations
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_namespace() -> String {
    "test".to_string()
}

fn default_hosts() -> Vec<String> {
    vec!["127.0.0.1:3000".to_string()]
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_true() -> bool {
    true
}

const fn default_batch_concurrency() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}
