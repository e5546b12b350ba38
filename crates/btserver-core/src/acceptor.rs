//! Connection accept loop

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::event::{EventSink, ServerEvent};
use crate::registry::{ClientRegistry, ClientSession};
use crate::session::{raised, SessionExit, SessionWorker};
use crate::state::StateCell;
use crate::transport::{Connection, TransportListener};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

type AcceptFuture = Pin<Box<dyn Future<Output = io::Result<Connection>> + Send>>;

/// One accept call, owning its handle on the listener so it can outlive a
/// single pass of the loop
fn next_accept(listener: &Arc<dyn TransportListener>) -> AcceptFuture {
    let listener = listener.clone();
    Box::pin(async move { listener.accept().await })
}

// ----------------------------------------------------------------------------
// Acceptor
// ----------------------------------------------------------------------------

/// Owns the listening endpoint and every session worker it spawns.
///
/// Runs until the shutdown flag is raised, then closes the listener and waits
/// for all of its session workers to finish. The controller's `stop` waits on
/// this task, so once it returns no more events can originate from the server.
///
/// An accept call in flight is only ever abandoned at shutdown. Session exits
/// and the bounded wait interleave with it without restarting it, so a
/// connection the transport has taken is always admitted.
pub struct Acceptor {
    listener: Arc<dyn TransportListener>,
    registry: Arc<ClientRegistry>,
    events: Arc<EventSink>,
    state: Arc<StateCell>,
    shutdown: watch::Receiver<bool>,
    config: EngineConfig,
    sessions: JoinSet<SessionExit>,
    accepted: u64,
}

impl Acceptor {
    pub fn new(
        listener: Box<dyn TransportListener>,
        registry: Arc<ClientRegistry>,
        events: Arc<EventSink>,
        state: Arc<StateCell>,
        shutdown: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> Self {
        Self {
            listener: Arc::from(listener),
            registry,
            events,
            state,
            shutdown,
            config,
            sessions: JoinSet::new(),
            accepted: 0,
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow() || !self.state.is_running()
    }

    /// Run the accept loop; returns the number of connections accepted
    pub async fn run(mut self) -> u64 {
        let endpoint = self.listener.local_endpoint();
        info!("Accepting connections on {}", endpoint);

        let mut accept = next_accept(&self.listener);
        let wait = self.config.accept_timeout;
        let mut tick = tokio::time::interval_at(Instant::now() + wait, wait);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stop_requested() {
            tokio::select! {
                biased;

                _ = raised(&mut self.shutdown) => break,

                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    log_session_exit(joined);
                }

                accepted = &mut accept => {
                    accept = next_accept(&self.listener);
                    match accepted {
                        Ok(connection) => self.admit(connection).await,
                        Err(e) => {
                            warn!("Accept on {} failed: {}", endpoint, e);
                            tokio::select! {
                                _ = raised(&mut self.shutdown) => break,
                                _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                            }
                        }
                    }
                }

                // Bounded wait elapsed; re-check the stop flag
                _ = tick.tick() => {}
            }
        }

        drop(accept);
        // Closing the listening endpoint
        drop(self.listener);
        debug!("Listener on {} closed", endpoint);

        let pending = self.sessions.len();
        if pending > 0 {
            debug!("Waiting for {} session worker(s) to finish", pending);
        }
        while let Some(joined) = self.sessions.join_next().await {
            log_session_exit(joined);
        }

        info!(
            "Accept loop on {} exited after {} connection(s)",
            endpoint, self.accepted
        );
        self.accepted
    }

    /// Register a new connection, announce it and start its read loop
    async fn admit(&mut self, connection: Connection) {
        let Connection {
            address,
            name,
            reader,
            writer,
        } = connection;

        if self.stop_requested() {
            debug!("Dropping connection from {} during shutdown", address);
            return;
        }

        let (session, close_rx) = ClientSession::new(address, name.clone(), writer);
        self.registry.add(session.clone()).await;
        self.accepted += 1;

        info!("Client connected: {}", address);
        self.events.emit(ServerEvent::ClientConnected { address, name });

        let worker = SessionWorker::new(
            session,
            reader,
            close_rx,
            self.shutdown.clone(),
            self.registry.clone(),
            self.events.clone(),
            self.config.read_buffer_size,
        );
        self.sessions.spawn(worker.run());
    }
}

fn log_session_exit(joined: Result<SessionExit, JoinError>) {
    match joined {
        Ok(exit) => debug!("Session worker finished: {:?}", exit),
        Err(e) => error!("Session worker failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PeerAddress;
    use crate::state::ServerState;
    use crate::transport::Endpoint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Yields queued connections, failing every accept while the queue is empty
    struct FlakyListener {
        attempts: Arc<AtomicUsize>,
        queued: tokio::sync::Mutex<mpsc::UnboundedReceiver<Connection>>,
    }

    #[async_trait]
    impl TransportListener for FlakyListener {
        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Memory { id: 99 }
        }

        async fn accept(&self) -> io::Result<Connection> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.queued.lock().await.try_recv() {
                Ok(connection) => Ok(connection),
                Err(_) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")),
            }
        }
    }

    /// Takes a queued connection, then keeps working on it before returning,
    /// like a transport that looks up the peer's name after accepting
    struct SlowListener {
        queued: tokio::sync::Mutex<mpsc::UnboundedReceiver<Connection>>,
        settle: Duration,
        accepted: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportListener for SlowListener {
        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Memory { id: 98 }
        }

        async fn accept(&self) -> io::Result<Connection> {
            let connection = self
                .queued
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "queue closed"))?;
            self.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.settle).await;
            Ok(connection)
        }
    }

    fn running_state() -> Arc<StateCell> {
        let state = Arc::new(StateCell::new());
        state
            .transition(ServerState::Stopped, ServerState::Starting)
            .unwrap();
        state
            .transition(ServerState::Starting, ServerState::Running)
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_accept_errors_are_retried_until_shutdown() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (queue, queued) = mpsc::unbounded_channel();
        let listener = FlakyListener {
            attempts: attempts.clone(),
            queued: tokio::sync::Mutex::new(queued),
        };
        let registry = Arc::new(ClientRegistry::new());
        let sink = Arc::new(EventSink::new());
        let mut events = sink.subscribe_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let acceptor = Acceptor::new(
            Box::new(listener),
            registry.clone(),
            sink,
            running_state(),
            shutdown_rx,
            EngineConfig::default(),
        );
        let handle = tokio::spawn(acceptor.run());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);

        // A transient failure does not stop later accepts
        let (_peer, server) = tokio::io::duplex(64);
        let address = PeerAddress::new([9, 9, 9, 9, 9, 9]);
        queue.send(Connection::from_stream(address, server)).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::ClientConnected { address, name: None });
        assert_eq!(registry.len().await, 1);

        shutdown.send_replace(true);
        let accepted = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_exits_immediately_when_not_running() {
        let (queue, queued) = mpsc::unbounded_channel();
        let (_peer, server) = tokio::io::duplex(64);
        queue
            .send(Connection::from_stream(PeerAddress::ANY, server))
            .unwrap();
        let listener = FlakyListener {
            attempts: Arc::new(AtomicUsize::new(0)),
            queued: tokio::sync::Mutex::new(queued),
        };
        let state = running_state();
        state
            .transition(ServerState::Running, ServerState::Stopping)
            .unwrap();
        let (_shutdown, shutdown_rx) = watch::channel(false);

        let acceptor = Acceptor::new(
            Box::new(listener),
            Arc::new(ClientRegistry::new()),
            Arc::new(EventSink::new()),
            state,
            shutdown_rx,
            EngineConfig::default(),
        );
        assert_eq!(acceptor.run().await, 0);
    }

    #[tokio::test]
    async fn test_slow_accept_outlasting_the_wait_is_still_admitted() {
        let (queue, queued) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let listener = SlowListener {
            queued: tokio::sync::Mutex::new(queued),
            settle: Duration::from_millis(80),
            accepted: accepted.clone(),
        };
        let registry = Arc::new(ClientRegistry::new());
        let sink = Arc::new(EventSink::new());
        let mut events = sink.subscribe_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let acceptor = Acceptor::new(
            Box::new(listener),
            registry.clone(),
            sink,
            running_state(),
            shutdown_rx,
            EngineConfig::default().with_accept_timeout(Duration::from_millis(30)),
        );
        let handle = tokio::spawn(acceptor.run());

        // Arrives partway through a wait and outlives the next one
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_peer, server) = tokio::io::duplex(64);
        let address = PeerAddress::new([1, 2, 3, 4, 5, 6]);
        queue.send(Connection::from_stream(address, server)).unwrap();

        let event = tokio::time::timeout(Duration::from_millis(600), events.recv())
            .await
            .expect("connection was lost")
            .unwrap();
        assert_eq!(event, ServerEvent::ClientConnected { address, name: None });
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);

        shutdown.send_replace(true);
        let total = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total, 1);
    }
}
