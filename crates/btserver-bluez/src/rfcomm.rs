//! RFCOMM listening transport

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{Listener, Socket, SocketAddr, Stream};
use bluer::{Adapter, Address, Session};
use btserver_core::{
    Connection, Endpoint, PeerAddress, Transport, TransportError, TransportListener,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const LISTEN_BACKLOG: u32 = 128;

/// Upper bound on the per-connection device name lookup
const NAME_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

/// A connection bluetoothd accepted on the registered profile's behalf
pub(crate) type ProfileConnection = (Stream, Address);

/// Engine address for a Bluetooth device address
pub fn peer_address(address: Address) -> PeerAddress {
    PeerAddress::new(address.0)
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// RFCOMM server socket on the default adapter.
///
/// Besides its own socket, the listener also yields the connections an
/// [`SdpAdvertiser`](crate::SdpAdvertiser) built with
/// [`SdpAdvertiser::for_transport`](crate::SdpAdvertiser::for_transport)
/// receives through its BlueZ profile.
#[derive(Debug, Clone)]
pub struct RfcommTransport {
    channel: u8,
    resolve_names: bool,
    profile_tx: mpsc::UnboundedSender<ProfileConnection>,
    profile_rx: Arc<Mutex<mpsc::UnboundedReceiver<ProfileConnection>>>,
}

impl RfcommTransport {
    /// Listen on a kernel-assigned channel and look up peer names
    pub fn new() -> Self {
        let (profile_tx, profile_rx) = mpsc::unbounded_channel();
        Self {
            channel: 0,
            resolve_names: true,
            profile_tx,
            profile_rx: Arc::new(Mutex::new(profile_rx)),
        }
    }

    /// Listen on a fixed channel instead of a kernel-assigned one
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_name_resolution(mut self, enabled: bool) -> Self {
        self.resolve_names = enabled;
        self
    }

    pub(crate) fn profile_sender(&self) -> mpsc::UnboundedSender<ProfileConnection> {
        self.profile_tx.clone()
    }
}

impl Default for RfcommTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    fn name(&self) -> &'static str {
        "rfcomm"
    }

    async fn bind(&self) -> Result<Box<dyn TransportListener>, TransportError> {
        let socket = Socket::new().map_err(TransportError::Socket)?;
        socket
            .bind(SocketAddr::new(Address::any(), self.channel))
            .map_err(TransportError::Bind)?;
        let local = socket.local_addr().map_err(TransportError::LocalAddress)?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .map_err(TransportError::Listen)?;
        debug!("RFCOMM listener bound on channel {}", local.channel);

        // Profile connections left over from a previous run
        let mut stale = 0;
        let mut pending = self.profile_rx.lock().await;
        while pending.try_recv().is_ok() {
            stale += 1;
        }
        drop(pending);
        if stale > 0 {
            debug!("Discarded {} stale profile connection(s)", stale);
        }

        let names = if self.resolve_names {
            NameResolver::open().await
        } else {
            None
        };

        Ok(Box::new(RfcommListener {
            listener,
            channel: local.channel,
            profile_connections: self.profile_rx.clone(),
            names,
        }))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

struct RfcommListener {
    listener: Listener,
    channel: u8,
    profile_connections: Arc<Mutex<mpsc::UnboundedReceiver<ProfileConnection>>>,
    names: Option<NameResolver>,
}

#[async_trait]
impl TransportListener for RfcommListener {
    fn local_endpoint(&self) -> Endpoint {
        Endpoint::Rfcomm {
            channel: self.channel,
        }
    }

    async fn accept(&self) -> io::Result<Connection> {
        let mut forwarded = self.profile_connections.lock().await;
        let (stream, remote) = tokio::select! {
            accepted = self.listener.accept() => {
                let (stream, remote) = accepted?;
                (stream, remote.addr)
            }
            Some(connection) = forwarded.recv() => connection,
        };
        drop(forwarded);

        let mut connection = Connection::from_stream(peer_address(remote), stream);
        if let Some(names) = &self.names {
            connection.name = names.lookup(remote).await;
        }
        Ok(connection)
    }
}

/// Looks up the alias BlueZ has cached for a connected device
struct NameResolver {
    _session: Session,
    adapter: Adapter,
}

impl NameResolver {
    async fn open() -> Option<Self> {
        let session = match Session::new().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Peer names unavailable, no BlueZ session: {}", e);
                return None;
            }
        };
        match session.default_adapter().await {
            Ok(adapter) => Some(Self {
                _session: session,
                adapter,
            }),
            Err(e) => {
                warn!("Peer names unavailable, no default adapter: {}", e);
                None
            }
        }
    }

    async fn lookup(&self, address: Address) -> Option<String> {
        let lookup = async {
            let device = self.adapter.device(address).ok()?;
            device.name().await.ok().flatten()
        };
        tokio::time::timeout(NAME_LOOKUP_TIMEOUT, lookup)
            .await
            .ok()
            .flatten()
            .filter(|name| !name.is_empty())
    }
}
