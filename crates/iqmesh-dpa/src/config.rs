//! Transaction timing configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DpaError, Result};

/// Environment variable names.
pub mod env_vars {
    pub const TIMEOUT_MS: &str = "IQMESH_DPA_TIMEOUT_MS";
    pub const RETRY_DELAY_MS: &str = "IQMESH_RETRY_DELAY_MS";
}

/// Timeouts and retry pacing for DPA transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpaConfig {
    /// Timeout for coordinator-addressed requests
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Timeout for node and broadcast requests
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// Base timeout for FRC sends; the FRC response time is added
    #[serde(default = "default_frc_timeout_ms")]
    pub frc_timeout_ms: u64,

    /// Pause between retried attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_node_timeout_ms() -> u64 {
    2000
}

fn default_frc_timeout_ms() -> u64 {
    2000
}

fn default_retry_delay_ms() -> u64 {
    250
}

impl Default for DpaConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            node_timeout_ms: default_node_timeout_ms(),
            frc_timeout_ms: default_frc_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DpaConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DpaError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DpaError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Apply `IQMESH_DPA_TIMEOUT_MS` and `IQMESH_RETRY_DELAY_MS` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_u64(env_vars::TIMEOUT_MS) {
            self.default_timeout_ms = ms;
        }
        if let Some(ms) = env_u64(env_vars::RETRY_DELAY_MS) {
            self.retry_delay_ms = ms;
        }
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "Ignoring non-numeric override");
            None
        }
    }
}
