//! btserver CLI configuration
//!
//! Loaded from an optional TOML file, then overridden by command-line flags.
//!
//! ```toml
//! [engine]
//! accept_timeout_ms = 1000
//! read_buffer_size = 4096
//! write_timeout_ms = 5000
//!
//! [service]
//! name = "Drawing Pen Remote"
//! uuid = "00001101-0000-1000-8000-00805F9B34FB"
//!
//! [transport]
//! kind = "tcp"
//! tcp_bind = "127.0.0.1:0"
//! rfcomm_channel = 0
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use btserver_core::{EngineConfig, ServerConfig, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub service: ServiceSection,
    pub transport: TransportSection,
}

/// Accept loop and session tuning, in TOML-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub accept_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub write_timeout_ms: u64,
}

/// Service record used by `--autostart` and as the default for `startServer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub kind: TransportKind,
    pub tcp_bind: SocketAddr,
    /// RFCOMM channel, 0 for kernel-assigned
    pub rfcomm_channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Loopback-friendly TCP listener
    #[default]
    Tcp,
    /// RFCOMM through BlueZ (requires the `bluez` feature)
    Bluez,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            accept_timeout_ms: engine.accept_timeout.as_millis() as u64,
            read_buffer_size: engine.read_buffer_size,
            write_timeout_ms: engine.write_timeout.as_millis() as u64,
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            uuid: DEFAULT_SERVICE_UUID.to_string(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            tcp_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            rfcomm_channel: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Conversion
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file; missing sections take defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `serve` flags on top of the loaded values
    pub fn apply_overrides(&mut self, args: &ServeArgs) {
        if let Some(kind) = args.transport {
            self.transport.kind = kind;
        }
        if let Some(bind) = args.bind {
            self.transport.tcp_bind = bind;
        }
        if let Some(name) = &args.name {
            self.service.name = name.clone();
        }
        if let Some(uuid) = &args.uuid {
            self.service.uuid = uuid.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine_config().validate()?;
        self.server_config()?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_accept_timeout(Duration::from_millis(self.engine.accept_timeout_ms))
            .with_read_buffer_size(self.engine.read_buffer_size)
            .with_write_timeout(Duration::from_millis(self.engine.write_timeout_ms))
    }

    pub fn server_config(&self) -> Result<ServerConfig> {
        ServerConfig::new(self.service.name.as_str(), &self.service.uuid).map_err(CliError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.server_config().unwrap(), ServerConfig::default());
        assert_eq!(config.transport.kind, TransportKind::Tcp);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [service]
            name = "Easel"

            [transport]
            kind = "bluez"
            rfcomm_channel = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.service.name, "Easel");
        assert_eq!(config.service.uuid, DEFAULT_SERVICE_UUID);
        assert_eq!(config.transport.kind, TransportKind::Bluez);
        assert_eq!(config.transport.rfcomm_channel, 4);
        assert_eq!(config.engine, EngineSection::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[engine]\nread_buffer_size = 0\n"),
            Err(CliError::ServiceConfig(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[service]\nuuid = \"nope\"\n"),
            Err(CliError::ServiceConfig(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[transport]\nkind = \"serial\"\n"),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = AppConfig::default();
        config.apply_overrides(&ServeArgs {
            transport: Some(TransportKind::Tcp),
            bind: Some("0.0.0.0:9000".parse().unwrap()),
            name: Some("Pen".into()),
            uuid: None,
            autostart: true,
        });
        assert_eq!(config.transport.tcp_bind.port(), 9000);
        assert_eq!(config.service.name, "Pen");
        assert_eq!(config.service.uuid, DEFAULT_SERVICE_UUID);
    }
}
