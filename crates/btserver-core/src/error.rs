//! Error types for the server engine
//!
//! Worker loops never propagate these: failures inside the accept loop or a
//! session are logged and surfaced as events. Only the controller's lifecycle
//! and broadcast operations hand an error back to the caller.

use std::io;

use thiserror::Error;

use crate::state::ServerState;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level failures: bind/listen/accept/send/receive
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to bind socket: {0}")]
    Bind(#[source] io::Error),

    #[error("Failed to get socket name: {0}")]
    LocalAddress(#[source] io::Error),

    #[error("Failed to listen on socket: {0}")]
    Listen(#[source] io::Error),

    #[error("Transport not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Short, caller-facing description used in error events
    pub fn summary(&self) -> &'static str {
        match self {
            TransportError::Socket(_) => "Failed to create socket",
            TransportError::Bind(_) => "Failed to bind socket",
            TransportError::LocalAddress(_) => "Failed to get socket name",
            TransportError::Listen(_) => "Failed to listen on socket",
            TransportError::Unsupported(_) => "Transport not supported",
            TransportError::Io(_) => "Transport I/O error",
        }
    }
}

/// Malformed start arguments
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Service identifier must not be empty")]
    EmptyServiceIdentifier,

    #[error("Invalid service identifier {value:?}: {reason}")]
    InvalidServiceIdentifier { value: String, reason: String },

    #[error("Invalid engine setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Service record registration failures (non-fatal to the server)
#[derive(Debug, Error)]
pub enum AdvertiseError {
    #[error("Service discovery backend unavailable: {0}")]
    Unavailable(String),

    #[error("Service registration rejected: {0}")]
    Rejected(String),
}

/// Platform capability probe failures, always reported to callers as `false`
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Adapter probe failed: {0}")]
    Failed(String),
}

/// Malformed peer address text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid peer address: {input:?}")]
pub struct AddressParseError {
    input: String,
}

impl AddressParseError {
    pub(crate) fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

/// Rejected command calls, mapped to an error code on the response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),
}

impl CommandError {
    /// Stable error code carried in the response
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CommandError::NotImplemented(_) => "NOT_IMPLEMENTED",
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        CommandError::InvalidArgument(e.to_string())
    }
}

// ----------------------------------------------------------------------------
// Server Error
// ----------------------------------------------------------------------------

/// Errors returned by [`ServerController`](crate::ServerController) operations
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server already running")]
    AlreadyRunning,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: ServerState, to: ServerState },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No connected clients")]
    NoClients,

    #[error("Delivery failed for {failed} of {attempted} clients")]
    PartialDelivery { failed: usize, attempted: usize },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ServerError>;
