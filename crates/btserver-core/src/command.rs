//! Named-method command surface over a [`ServerController`]
//!
//! Calls arrive as `{ "method": ..., "arguments": ... }` and are answered with
//! a success carrying a JSON value or an error carrying a code and message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ServerConfig, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};
use crate::controller::ServerController;
use crate::error::CommandError;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// One invocation from the remote caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Outcome of one [`MethodCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MethodResponse {
    Success { result: Value },
    Error { code: String, message: String },
}

impl MethodResponse {
    pub fn success(result: impl Into<Value>) -> Self {
        MethodResponse::Success {
            result: result.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MethodResponse::Success { .. })
    }

    /// The boolean result, if this is a boolean success
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MethodResponse::Success { result } => result.as_bool(),
            MethodResponse::Error { .. } => None,
        }
    }
}

impl From<CommandError> for MethodResponse {
    fn from(e: CommandError) -> Self {
        MethodResponse::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Methods understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    StartServer,
    StopServer,
    SendMessage,
    DisconnectClients,
    IsBluetoothAvailable,
    IsBluetoothEnabled,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "startServer" => Some(Method::StartServer),
            "stopServer" => Some(Method::StopServer),
            "sendMessage" => Some(Method::SendMessage),
            "disconnectClients" => Some(Method::DisconnectClients),
            "isBluetoothAvailable" => Some(Method::IsBluetoothAvailable),
            "isBluetoothEnabled" => Some(Method::IsBluetoothEnabled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::StartServer => "startServer",
            Method::StopServer => "stopServer",
            Method::SendMessage => "sendMessage",
            Method::DisconnectClients => "disconnectClients",
            Method::IsBluetoothAvailable => "isBluetoothAvailable",
            Method::IsBluetoothEnabled => "isBluetoothEnabled",
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Decodes method calls and drives the controller
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    controller: Arc<ServerController>,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<ServerController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<ServerController> {
        &self.controller
    }

    /// Decode one JSON call and execute it
    pub async fn dispatch_json(&self, line: &str) -> MethodResponse {
        match serde_json::from_str::<MethodCall>(line) {
            Ok(call) => self.dispatch(call).await,
            Err(e) => CommandError::InvalidArgument(format!("Malformed call: {}", e)).into(),
        }
    }

    pub async fn dispatch(&self, call: MethodCall) -> MethodResponse {
        match self.execute(&call).await {
            Ok(result) => MethodResponse::Success { result },
            Err(e) => {
                debug!("Call to {} rejected: {}", call.method, e);
                e.into()
            }
        }
    }

    async fn execute(&self, call: &MethodCall) -> Result<Value, CommandError> {
        let method = Method::parse(&call.method)
            .ok_or_else(|| CommandError::NotImplemented(call.method.clone()))?;

        match method {
            Method::StartServer => {
                let args = arguments_map(&call.arguments)?;
                let name = optional_string(args, "serviceName")?.unwrap_or(DEFAULT_SERVICE_NAME);
                let uuid = optional_string(args, "serviceUuid")?.unwrap_or(DEFAULT_SERVICE_UUID);
                let config = ServerConfig::new(name, uuid)?;
                Ok(Value::Bool(self.controller.start(config).await.is_ok()))
            }
            Method::StopServer => {
                self.controller.stop().await;
                Ok(Value::Bool(true))
            }
            Method::SendMessage => {
                let args = arguments_map(&call.arguments)?;
                let message = optional_string(args, "message")?
                    .ok_or_else(|| CommandError::InvalidArgument("Message is required".into()))?;
                Ok(Value::Bool(self.controller.send_message(message).await.is_ok()))
            }
            Method::DisconnectClients => {
                self.controller.disconnect_clients().await;
                Ok(Value::Bool(true))
            }
            Method::IsBluetoothAvailable => {
                Ok(Value::Bool(self.controller.is_service_available().await))
            }
            Method::IsBluetoothEnabled => Ok(Value::Bool(self.controller.is_service_enabled().await)),
        }
    }
}

fn arguments_map(arguments: &Value) -> Result<&Map<String, Value>, CommandError> {
    arguments
        .as_object()
        .ok_or_else(|| CommandError::InvalidArgument("Arguments must be a map".into()))
}

fn optional_string<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, CommandError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(CommandError::InvalidArgument(format!(
            "{} must be a string",
            key
        ))),
    }
}
