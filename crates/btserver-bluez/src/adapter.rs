//! Adapter presence and power probing

use async_trait::async_trait;
use bluer::{Adapter, Session};
use btserver_core::{CapabilityProbe, ProbeError};

use crate::error::BluezError;

/// Probes the default BlueZ adapter on every call
#[derive(Debug, Clone, Default)]
pub struct AdapterProbe;

impl AdapterProbe {
    pub fn new() -> Self {
        Self
    }

    /// The adapter, or None when no adapter is present
    async fn adapter(&self) -> Result<Option<(Session, Adapter)>, BluezError> {
        let session = Session::new()
            .await
            .map_err(|e| BluezError::Session(e.to_string()))?;
        match session.default_adapter().await {
            Ok(adapter) => Ok(Some((session, adapter))),
            Err(e) => {
                tracing::debug!("No Bluetooth adapter: {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CapabilityProbe for AdapterProbe {
    async fn is_available(&self) -> Result<bool, ProbeError> {
        Ok(self.adapter().await?.is_some())
    }

    async fn is_enabled(&self) -> Result<bool, ProbeError> {
        match self.adapter().await? {
            Some((_session, adapter)) => adapter
                .is_powered()
                .await
                .map_err(|e| BluezError::Adapter(e.to_string()).into()),
            None => Ok(false),
        }
    }
}
