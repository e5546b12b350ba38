//! SDP service record registration through BlueZ profiles

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::Session;
use btserver_core::{AdvertiseError, Endpoint, ServiceAdvertiser, ServiceRecord};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BluezError;
use crate::rfcomm::{ProfileConnection, RfcommTransport};

/// Publishes the service record as a BlueZ RFCOMM server profile.
///
/// bluetoothd owns the SDP record for as long as the profile is registered
/// and may accept connections on the advertised channel itself. Those arrive
/// on the profile handle; they are accepted and handed to the RFCOMM listener
/// of the transport this advertiser was built for, so they reach the engine
/// like any other connection. Unregistering drops the handle, which withdraws
/// the profile.
pub struct SdpAdvertiser {
    session: Option<Session>,
    forward: mpsc::UnboundedSender<ProfileConnection>,
    profile: Option<JoinHandle<()>>,
}

impl SdpAdvertiser {
    /// Advertiser whose profile connections feed `transport`'s listener
    pub fn for_transport(transport: &RfcommTransport) -> Self {
        Self {
            session: None,
            forward: transport.profile_sender(),
            profile: None,
        }
    }

    async fn session(&mut self) -> Result<&Session, BluezError> {
        if self.session.is_none() {
            let session = Session::new()
                .await
                .map_err(|e| BluezError::Session(e.to_string()))?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| BluezError::Session("session not initialised".into()))
    }

    fn profile_for(record: &ServiceRecord) -> Profile {
        let channel = match record.endpoint {
            Endpoint::Rfcomm { channel } => Some(u16::from(channel)),
            _ => None,
        };
        Profile {
            uuid: record.uuid,
            name: Some(record.name.clone()),
            channel,
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        }
    }

    fn withdraw(&mut self) -> bool {
        match self.profile.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SdpAdvertiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdpAdvertiser")
            .field("registered", &self.profile.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for SdpAdvertiser {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Accept every connection bluetoothd offers on the profile and pass it on
async fn forward_profile_connections(
    mut handle: ProfileHandle,
    forward: mpsc::UnboundedSender<ProfileConnection>,
) {
    while let Some(request) = handle.next().await {
        let device = request.device();
        match request.accept() {
            Ok(stream) => {
                debug!("Profile connection from {}", device);
                if forward.send((stream, device)).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to accept profile connection from {}: {}", device, e),
        }
    }
    debug!("Profile connection stream ended");
}

#[async_trait]
impl ServiceAdvertiser for SdpAdvertiser {
    async fn register(&mut self, record: &ServiceRecord) -> Result<(), AdvertiseError> {
        // A new record replaces the old one
        self.withdraw();

        let profile = Self::profile_for(record);
        let session = self.session().await?;
        let handle = session
            .register_profile(profile)
            .await
            .map_err(|e| BluezError::Profile(e.to_string()))?;

        let forward = self.forward.clone();
        self.profile = Some(tokio::spawn(forward_profile_connections(handle, forward)));
        info!(
            "Registered SDP record '{}' ({}) for {}",
            record.name, record.uuid, record.endpoint
        );
        Ok(())
    }

    async fn unregister(&mut self) -> Result<(), AdvertiseError> {
        if self.withdraw() {
            debug!("Unregistered SDP record");
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.profile.is_some()
    }
}
