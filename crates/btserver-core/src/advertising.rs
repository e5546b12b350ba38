//! Service record advertisement
//!
//! Registration is best-effort: when it fails the server keeps accepting
//! connections and only discoverability is lost.

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::error::AdvertiseError;
use crate::transport::Endpoint;

// ----------------------------------------------------------------------------
// Service Record
// ----------------------------------------------------------------------------

/// Discoverable description of a listening server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub uuid: Uuid,
    pub endpoint: Endpoint,
}

// ----------------------------------------------------------------------------
// Advertiser Trait
// ----------------------------------------------------------------------------

/// Publishes and withdraws the service record with the platform's discovery subsystem
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Publish `record`. Replaces any record this advertiser registered earlier.
    async fn register(&mut self, record: &ServiceRecord) -> Result<(), AdvertiseError>;

    /// Withdraw the published record, if any
    async fn unregister(&mut self) -> Result<(), AdvertiseError>;

    /// Whether a record is currently published
    fn is_registered(&self) -> bool;
}

// ----------------------------------------------------------------------------
// No-op Implementation
// ----------------------------------------------------------------------------

/// Advertiser for transports without a discovery subsystem
#[derive(Debug, Default)]
pub struct NoopAdvertiser;

impl NoopAdvertiser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceAdvertiser for NoopAdvertiser {
    async fn register(&mut self, record: &ServiceRecord) -> Result<(), AdvertiseError> {
        warn!(
            "Service advertisement not supported here. '{}' ({}) on {} will not be discoverable.",
            record.name, record.uuid, record.endpoint
        );
        Ok(())
    }

    async fn unregister(&mut self) -> Result<(), AdvertiseError> {
        Ok(())
    }

    fn is_registered(&self) -> bool {
        false
    }
}
