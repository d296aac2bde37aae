//! Configuration types for cloud-runtimes clients

use crate::error::CloudRuntimesError;
use crate::traits::RuntimesResult;
use crate::types::StateConsistency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for bulk read fan-out when none is configured
pub const DEFAULT_MAX_BULK_PARALLELISM: usize = 16;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name for logging
    pub name: String,

    /// Sidecar connection settings
    pub sidecar: SidecarConfig,

    /// State API settings
    pub state: StateConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "cloudrt-client".to_string(),
            sidecar: SidecarConfig::default(),
            state: StateConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> RuntimesResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| CloudRuntimesError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RuntimesResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CloudRuntimesError::Serialization(e.to_string()))
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> RuntimesResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CloudRuntimesError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> RuntimesResult<()> {
        if self.state.max_bulk_parallelism == 0 {
            return Err(CloudRuntimesError::ConfigError(
                "state.max_bulk_parallelism must be at least 1".into(),
            ));
        }
        if self.sidecar.request_timeout_ms == Some(0) {
            return Err(CloudRuntimesError::ConfigError(
                "sidecar.request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Sidecar connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Sidecar address
    pub address: String,

    /// API token attached to every request
    pub api_token: Option<String>,

    /// Deadline applied to calls that carry none
    pub request_timeout_ms: Option<u64>,
}

impl SidecarConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:50001".to_string(),
            api_token: None,
            request_timeout_ms: None,
        }
    }
}

/// State API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Store used by the CLI when none is given
    pub default_store: String,

    /// Cap on concurrent transport calls of one bulk read
    pub max_bulk_parallelism: usize,

    /// Consistency used by plain `get_state`
    pub default_consistency: StateConsistency,

    /// Data directory of the local sled backend
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            default_store: "statestore".to_string(),
            max_bulk_parallelism: DEFAULT_MAX_BULK_PARALLELISM,
            default_consistency: StateConsistency::Eventual,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(
            r#"{"state": {"max_bulk_parallelism": 4, "default_consistency": "Strong"}}"#,
        )
        .unwrap();
        assert_eq!(config.state.max_bulk_parallelism, 4);
        assert_eq!(config.state.default_consistency, StateConsistency::Strong);
        assert_eq!(config.state.default_store, "statestore");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let result = ClientConfig::from_json(r#"{"state": {"max_bulk_parallelism": 0}}"#);
        assert!(matches!(result, Err(CloudRuntimesError::ConfigError(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = ClientConfig::default();
        config.sidecar.request_timeout_ms = Some(250);
        let restored = ClientConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(
            restored.sidecar.request_timeout(),
            Some(Duration::from_millis(250))
        );
    }
}
