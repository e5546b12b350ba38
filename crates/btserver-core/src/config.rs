//! Engine and service configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Service name used when the caller does not supply one
pub const DEFAULT_SERVICE_NAME: &str = "Drawing Pen Remote";

/// Serial Port Profile UUID, used when the caller does not supply one
pub const DEFAULT_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

// ----------------------------------------------------------------------------
// Service Configuration
// ----------------------------------------------------------------------------

/// What the server advertises. Immutable once the server has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Human-readable service name published in the service record
    pub service_name: String,
    /// Service class identifier peers search for
    pub service_uuid: Uuid,
}

impl ServerConfig {
    /// Validate caller-supplied start arguments
    pub fn new(service_name: impl Into<String>, service_identifier: &str) -> Result<Self, ConfigError> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }

        let identifier = service_identifier.trim();
        if identifier.is_empty() {
            return Err(ConfigError::EmptyServiceIdentifier);
        }
        let service_uuid =
            Uuid::parse_str(identifier).map_err(|e| ConfigError::InvalidServiceIdentifier {
                value: service_identifier.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            service_name,
            service_uuid,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_uuid: Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB),
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Tuning for the accept loop and session workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single accept wait; the stop signal is re-checked after each
    pub accept_timeout: Duration,
    /// Size of the per-session read buffer; each read yields at most this many bytes
    pub read_buffer_size: usize,
    /// Upper bound on delivering one broadcast to one peer
    pub write_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(1),
            read_buffer_size: 4096,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accept wait bound
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Set the read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the per-peer write bound
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accept_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "accept_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "read_buffer_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "write_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_matches_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(
            config.service_uuid,
            Uuid::parse_str(DEFAULT_SERVICE_UUID).unwrap()
        );
    }

    #[test]
    fn test_rejects_empty_name_and_identifier() {
        assert_eq!(
            ServerConfig::new("  ", DEFAULT_SERVICE_UUID),
            Err(ConfigError::EmptyServiceName)
        );
        assert_eq!(
            ServerConfig::new("X", ""),
            Err(ConfigError::EmptyServiceIdentifier)
        );
    }

    #[test]
    fn test_rejects_malformed_uuid() {
        let err = ServerConfig::new("X", "not-a-uuid").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServiceIdentifier { .. }));
    }

    #[test]
    fn test_engine_config_builder_and_validation() {
        let config = EngineConfig::new()
            .with_accept_timeout(Duration::from_millis(100))
            .with_read_buffer_size(16)
            .with_write_timeout(Duration::from_millis(250));
        assert!(config.validate().is_ok());
        assert_eq!(config.read_buffer_size, 16);

        let bad = EngineConfig::new().with_read_buffer_size(0);
        assert!(bad.validate().is_err());
    }
}
