//! Thread-safe registry of active client sessions
//!
//! The registry lock only guards the map. Outbound writes go through each
//! session's own writer lock, so a slow peer never holds up connects or
//! disconnects elsewhere.

use core::fmt;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::address::PeerAddress;
use crate::transport::BoxedWriter;

// ----------------------------------------------------------------------------
// Session Identity
// ----------------------------------------------------------------------------

/// Opaque handle identifying one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time description of a connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: SessionId,
    pub address: PeerAddress,
    pub connected_at: SystemTime,
}

// ----------------------------------------------------------------------------
// Client Session Handle
// ----------------------------------------------------------------------------

/// Shared handle to one accepted connection.
///
/// The connection is closed exactly once: whichever of read-loop exit,
/// explicit disconnect or server stop gets there first wins, and later
/// attempts are no-ops.
pub struct ClientSession {
    info: ClientInfo,
    name: Option<String>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
}

impl ClientSession {
    /// Create a session and the receiver its read loop watches for close requests
    pub fn new(
        address: PeerAddress,
        name: Option<String>,
        writer: BoxedWriter,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (close_signal, close_rx) = watch::channel(false);
        let session = Arc::new(Self {
            info: ClientInfo {
                id: SessionId::new(),
                address,
                connected_at: SystemTime::now(),
            },
            name,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            close_signal,
        });
        (session, close_rx)
    }

    pub fn id(&self) -> SessionId {
        self.info.id
    }

    pub fn address(&self) -> PeerAddress {
        self.info.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn connected_at(&self) -> SystemTime {
        self.info.connected_at
    }

    pub fn info(&self) -> ClientInfo {
        self.info.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Request the connection be closed. Returns true for the first caller only.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_signal.send_replace(true);
        debug!("Closing session {} ({})", self.info.id, self.info.address);
        true
    }

    /// Write `bytes` to the peer within `timeout`
    pub async fn send(&self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }

        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session closed"))?;

        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }

    /// Drop the write half, shutting it down first. Idempotent.
    pub(crate) async fn release_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of session {} writer failed: {}", self.info.id, e);
            }
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("info", &self.info)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Sessions whose connection is open and whose read loop is still running
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<ClientSession>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session
    pub async fn add(&self, session: Arc<ClientSession>) {
        self.sessions.write().await.insert(session.id(), session);
    }

    /// Deregister a session; None if it was already gone
    pub async fn remove(&self, id: SessionId) -> Option<Arc<ClientSession>> {
        self.sessions.write().await.remove(&id)
    }

    /// Copy of the current sessions, oldest first
    pub async fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| (s.connected_at(), s.id()));
        sessions
    }

    /// Close every session and empty the registry, returning how many were closed.
    ///
    /// Each session's read loop observes the close and reports the disconnect.
    pub async fn clear_and_close(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(last: u8) -> (Arc<ClientSession>, watch::Receiver<bool>) {
        ClientSession::new(
            PeerAddress::new([0, 0, 0, 0, 0, last]),
            None,
            Box::pin(tokio::io::sink()),
        )
    }

    #[tokio::test]
    async fn test_add_remove_snapshot() {
        let registry = ClientRegistry::new();
        let (a, _ra) = session(1);
        let (b, _rb) = session(2);
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;
        assert_eq!(registry.len().await, 2);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(!registry.contains(a.id()).await);

        // The earlier copy is unaffected by later mutation
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_and_close_signals_every_session() {
        let registry = ClientRegistry::new();
        let (a, mut ra) = session(1);
        let (b, mut rb) = session(2);
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;

        assert_eq!(registry.clear_and_close().await, 2);
        assert!(registry.is_empty().await);
        assert!(a.is_closed() && b.is_closed());
        assert!(*ra.borrow_and_update());
        assert!(*rb.borrow_and_update());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _ra) = session(1);
        assert!(a.close());
        assert!(!a.close());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _ra) = session(1);
        a.send(b"ok", Duration::from_secs(1)).await.unwrap();
        a.close();
        let err = a.send(b"late", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_send_writes_exact_bytes() {
        let writer = tokio_test::io::Builder::new().write(b"pong").build();
        let (a, _ra) = ClientSession::new(PeerAddress::ANY, None, Box::pin(writer));
        a.send(b"pong", Duration::from_secs(1)).await.unwrap();
        a.release_writer().await;
    }

    #[tokio::test]
    async fn test_send_error_leaves_session_open() {
        let writer = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (a, _ra) = ClientSession::new(PeerAddress::ANY, None, Box::pin(writer));
        let err = a.send(b"pong", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_release_fails() {
        let (a, _ra) = session(1);
        a.release_writer().await;
        a.release_writer().await;
        assert!(a.send(b"x", Duration::from_secs(1)).await.is_err());
    }
}
