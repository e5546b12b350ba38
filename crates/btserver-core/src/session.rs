//! Per-connection read loop

use std::io;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::event::{decode_payload, EventSink, ServerEvent};
use crate::registry::{ClientRegistry, ClientSession};
use crate::transport::BoxedReader;

/// Why a session's read loop ended
#[derive(Debug)]
pub enum SessionExit {
    /// The peer closed its end (zero-byte read)
    PeerClosed,
    /// Reading failed
    ReadError(io::Error),
    /// The session was closed locally (disconnect request)
    Closed,
    /// The server is shutting down
    Shutdown,
}

// ----------------------------------------------------------------------------
// Session Worker
// ----------------------------------------------------------------------------

/// Owns the read half of one connection until it terminates.
///
/// Emits `MessageReceived` for every non-empty read, then on exit removes the
/// session from the registry, closes the connection and emits a single
/// `ClientDisconnected`.
pub struct SessionWorker {
    session: Arc<ClientSession>,
    reader: BoxedReader,
    close_rx: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    registry: Arc<ClientRegistry>,
    events: Arc<EventSink>,
    buffer_size: usize,
}

impl SessionWorker {
    pub fn new(
        session: Arc<ClientSession>,
        reader: BoxedReader,
        close_rx: watch::Receiver<bool>,
        shutdown: watch::Receiver<bool>,
        registry: Arc<ClientRegistry>,
        events: Arc<EventSink>,
        buffer_size: usize,
    ) -> Self {
        Self {
            session,
            reader,
            close_rx,
            shutdown,
            registry,
            events,
            buffer_size,
        }
    }

    /// Run the read loop to completion
    pub async fn run(mut self) -> SessionExit {
        let address = self.session.address();
        let mut buffer = vec![0u8; self.buffer_size.max(1)];

        let exit = loop {
            tokio::select! {
                biased;

                _ = raised(&mut self.close_rx) => break SessionExit::Closed,
                _ = raised(&mut self.shutdown) => break SessionExit::Shutdown,
                read = self.reader.read(&mut buffer) => match read {
                    Ok(0) => break SessionExit::PeerClosed,
                    Ok(n) => {
                        let message = decode_payload(&buffer[..n]);
                        debug!("Received {} bytes from {}", n, address);
                        self.events.emit(ServerEvent::MessageReceived { address, message });
                    }
                    Err(e) => break SessionExit::ReadError(e),
                },
            }
        };

        match &exit {
            SessionExit::ReadError(e) => debug!("Read from {} failed: {}", address, e),
            other => debug!("Session {} ended: {:?}", address, other),
        }

        self.registry.remove(self.session.id()).await;
        self.session.close();
        self.session.release_writer().await;
        drop(self.reader);

        info!("Client disconnected: {}", address);
        self.events.emit(ServerEvent::ClientDisconnected { address });
        exit
    }
}

/// Resolves once `flag` is set, or once its sender is gone
pub(crate) async fn raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PeerAddress;
    use crate::transport::Connection;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    struct Fixture {
        worker: SessionWorker,
        session: Arc<ClientSession>,
        registry: Arc<ClientRegistry>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        peer: tokio::io::DuplexStream,
        shutdown: watch::Sender<bool>,
    }

    async fn fixture(buffer_size: usize) -> Fixture {
        let (peer, server) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(PeerAddress::new([1, 2, 3, 4, 5, 6]), server);
        let (session, close_rx) = ClientSession::new(conn.address, None, conn.writer);
        let registry = Arc::new(ClientRegistry::new());
        registry.add(session.clone()).await;
        let sink = Arc::new(EventSink::new());
        let events = sink.subscribe_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = SessionWorker::new(
            session.clone(),
            conn.reader,
            close_rx,
            shutdown_rx,
            registry.clone(),
            sink,
            buffer_size,
        );
        Fixture {
            worker,
            session,
            registry,
            events,
            peer,
            shutdown,
        }
    }

    #[tokio::test]
    async fn test_messages_then_single_disconnect_on_peer_close() {
        let mut f = fixture(4096).await;
        let handle = tokio::spawn(f.worker.run());

        f.peer.write_all(b"ping").await.unwrap();
        let event = timeout(Duration::from_secs(1), f.events.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            ServerEvent::MessageReceived {
                address: PeerAddress::new([1, 2, 3, 4, 5, 6]),
                message: "ping".into()
            }
        );

        drop(f.peer);
        let exit = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(matches!(exit, SessionExit::PeerClosed));

        let event = f.events.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::ClientDisconnected { .. }));
        assert!(f.events.try_recv().is_err());
        assert!(f.registry.is_empty().await);
        assert!(f.session.is_closed());
    }

    #[tokio::test]
    async fn test_reads_are_bounded_by_buffer_size() {
        let mut f = fixture(4).await;
        let handle = tokio::spawn(f.worker.run());

        f.peer.write_all(b"abcdef").await.unwrap();
        let mut received = String::new();
        while received.len() < 6 {
            match timeout(Duration::from_secs(1), f.events.recv()).await.unwrap().unwrap() {
                ServerEvent::MessageReceived { message, .. } => {
                    assert!(message.len() <= 4);
                    received.push_str(&message);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(received, "abcdef");

        f.session.close();
        let exit = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(matches!(exit, SessionExit::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_session() {
        let f = fixture(64).await;
        let handle = tokio::spawn(f.worker.run());
        f.shutdown.send_replace(true);
        let exit = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(matches!(exit, SessionExit::Shutdown));
        assert!(f.session.is_closed());
    }
}
