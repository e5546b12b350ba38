//! Stand-ins for platforms without BlueZ

use async_trait::async_trait;
use btserver_core::{
    AdvertiseError, CapabilityProbe, ProbeError, ServiceAdvertiser, ServiceRecord, Transport,
    TransportError, TransportListener,
};
use tracing::warn;

use crate::error::BluezError;

/// RFCOMM transport that always fails to bind
#[derive(Debug, Clone, Default)]
pub struct RfcommTransport;

impl RfcommTransport {
    pub fn new() -> Self {
        Self
    }

    pub fn with_channel(self, _channel: u8) -> Self {
        self
    }

    pub fn with_name_resolution(self, _enabled: bool) -> Self {
        self
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    fn name(&self) -> &'static str {
        "rfcomm"
    }

    async fn bind(&self) -> Result<Box<dyn TransportListener>, TransportError> {
        Err(TransportError::Unsupported(
            "RFCOMM sockets require Linux with BlueZ".into(),
        ))
    }
}

/// Advertiser that cannot publish anything
#[derive(Debug)]
pub struct SdpAdvertiser;

impl SdpAdvertiser {
    pub fn for_transport(_transport: &RfcommTransport) -> Self {
        Self
    }
}

#[async_trait]
impl ServiceAdvertiser for SdpAdvertiser {
    async fn register(&mut self, record: &ServiceRecord) -> Result<(), AdvertiseError> {
        warn!(
            "SDP registration not supported on this platform. '{}' will not be discoverable.",
            record.name
        );
        Err(BluezError::Unsupported.into())
    }

    async fn unregister(&mut self) -> Result<(), AdvertiseError> {
        Ok(())
    }

    fn is_registered(&self) -> bool {
        false
    }
}

/// Probe that cannot determine adapter state
#[derive(Debug, Clone, Default)]
pub struct AdapterProbe;

impl AdapterProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CapabilityProbe for AdapterProbe {
    async fn is_available(&self) -> Result<bool, ProbeError> {
        Err(BluezError::Unsupported.into())
    }

    async fn is_enabled(&self) -> Result<bool, ProbeError> {
        Err(BluezError::Unsupported.into())
    }
}
