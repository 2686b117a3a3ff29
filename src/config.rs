//! Configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReteResult, ValidationError};

/// Network thread settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Max queued commands before submissions fail with `QueueFull`.
    pub command_queue_capacity: usize,
    /// Per-subscriber buffer for constraint status events.
    pub event_stream_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
            event_stream_capacity: 256,
        }
    }
}

/// Chain query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Upper bound on a single chain query.
    pub query_timeout_ms: u64,
}

impl ChainConfig {
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 10_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReteConfig {
    pub runtime: RuntimeConfig,
    pub chain: ChainConfig,
}

impl ReteConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(s: &str) -> ReteResult<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid config JSON: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ReteResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let zero = |field: &str| ValidationError::InvalidConfig {
            reason: format!("{field} must be greater than zero"),
        };
        if self.runtime.command_queue_capacity == 0 {
            return Err(zero("runtime.command_queue_capacity"));
        }
        if self.runtime.event_stream_capacity == 0 {
            return Err(zero("runtime.event_stream_capacity"));
        }
        if self.chain.query_timeout_ms == 0 {
            return Err(zero("chain.query_timeout_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg = ReteConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, ReteConfig::default());
        assert_eq!(cfg.runtime.command_queue_capacity, 1024);
        assert_eq!(cfg.chain.query_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = ReteConfig::from_json_str(r#"{"chain":{"query_timeout_ms":250}}"#).unwrap();
        assert_eq!(cfg.chain.query_timeout_ms, 250);
        assert_eq!(cfg.runtime.event_stream_capacity, 256);
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = ReteConfig::from_json_str(r#"{"runtime":{"command_queue_capacity":0}}"#).unwrap_err();
        assert!(err.is_validation());
        assert!(format!("{err}").contains("command_queue_capacity"));
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(ReteConfig::from_json_str("{").unwrap_err().is_validation());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"runtime":{{"event_stream_capacity":8}}}}"#).unwrap();
        let cfg = ReteConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.runtime.event_stream_capacity, 8);

        let dir = tempfile::tempdir().unwrap();
        assert!(ReteConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
