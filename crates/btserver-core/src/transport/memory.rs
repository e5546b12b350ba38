//! In-process transport with caller-chosen peer addresses
//!
//! Connections are `tokio::io::duplex` pairs: the server half is queued on the
//! active listener and the peer half is returned to the caller. Write faults
//! can be injected per connection to exercise partial broadcast failures.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::address::PeerAddress;
use crate::error::TransportError;

use super::{Connection, Endpoint, Transport, TransportListener};

/// Per-direction buffer of each in-memory connection
const DUPLEX_BUFFER: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Shared Hub
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Hub {
    next_id: AtomicU64,
    fail_bind: AtomicBool,
    active: Mutex<Option<ActiveListener>>,
}

struct ActiveListener {
    id: u64,
    incoming: mpsc::UnboundedSender<Connection>,
}

impl Hub {
    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveListener>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Memory Transport
// ----------------------------------------------------------------------------

/// Transport whose peers live in the same process
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for opening peer connections to whichever listener is bound
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            hub: self.hub.clone(),
        }
    }

    /// Make subsequent binds fail, as if the adapter refused the socket
    pub fn set_fail_bind(&self, fail: bool) {
        self.hub.fail_bind.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bind(&self) -> Result<Box<dyn TransportListener>, TransportError> {
        if self.hub.fail_bind.load(Ordering::SeqCst) {
            return Err(TransportError::Bind(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "memory transport configured to refuse binds",
            )));
        }

        let mut active = self.hub.lock_active();
        if active.is_some() {
            return Err(TransportError::Bind(io::Error::new(
                io::ErrorKind::AddrInUse,
                "a memory listener is already bound",
            )));
        }

        let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *active = Some(ActiveListener { id, incoming: tx });

        Ok(Box::new(MemoryListener {
            id,
            hub: self.hub.clone(),
            incoming: AsyncMutex::new(rx),
        }))
    }
}

struct MemoryListener {
    id: u64,
    hub: Arc<Hub>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<Connection>>,
}

#[async_trait]
impl TransportListener for MemoryListener {
    fn local_endpoint(&self) -> Endpoint {
        Endpoint::Memory { id: self.id }
    }

    async fn accept(&self) -> io::Result<Connection> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut active = self.hub.lock_active();
        if active.as_ref().map(|a| a.id) == Some(self.id) {
            active.take();
        }
    }
}

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// Options for one simulated peer
#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    /// Display name reported with the connect event
    pub name: Option<String>,
    /// Every server-side write to this peer fails with `BrokenPipe`
    pub fail_writes: bool,
}

/// Opens peer connections against a [`MemoryTransport`]
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<Hub>,
}

impl MemoryConnector {
    /// Connect as `address`, returning the peer's end of the stream
    pub fn connect(&self, address: PeerAddress) -> io::Result<DuplexStream> {
        self.connect_with(address, PeerOptions::default())
    }

    /// Connect as `address` with explicit peer behaviour
    pub fn connect_with(&self, address: PeerAddress, options: PeerOptions) -> io::Result<DuplexStream> {
        let active = self.hub.lock_active();
        let listener = active.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no memory listener bound")
        })?;

        let (peer_side, server_side) = tokio::io::duplex(DUPLEX_BUFFER);
        let mut connection = Connection::from_stream(address, server_side);
        connection.name = options.name;
        if options.fail_writes {
            connection.writer = Box::pin(FailingWriter);
        }

        listener.incoming.send(connection).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "memory listener closed")
        })?;
        Ok(peer_side)
    }

    /// Whether a listener is currently accepting
    pub fn is_listening(&self) -> bool {
        self.hub.lock_active().is_some()
    }
}

/// Writer that refuses every write
struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
