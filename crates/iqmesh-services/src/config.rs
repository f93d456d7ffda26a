//! Service configuration.
//!
//! Loaded from TOML with defaults for every field:
//!
//! ```toml
//! default_repeat = 2
//!
//! [dpa]
//! retry_delay_ms = 250
//! ```

use std::path::Path;

use iqmesh_dpa::DpaConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Environment variable overriding `default_repeat`.
pub const REPEAT_ENV: &str = "IQMESH_REPEAT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Transaction timing
    #[serde(default)]
    pub dpa: DpaConfig,

    /// Extra attempts per transaction when a request does not say
    #[serde(default = "default_repeat")]
    pub default_repeat: u8,
}

fn default_repeat() -> u8 {
    1
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dpa: DpaConfig::default(),
            default_repeat: default_repeat(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ServiceError::parsing(format!("config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::service(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(category = "config", path = %path.display(), "Loaded service config");
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        self.dpa = self.dpa.with_env_overrides();
        if let Some(repeat) = std::env::var(REPEAT_ENV).ok().and_then(|v| v.parse().ok()) {
            self.default_repeat = repeat;
        }
        self
    }
}
