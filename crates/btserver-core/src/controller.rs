//! Server lifecycle and public operation surface
//!
//! [`ServerController`] owns the state machine and composes the transport,
//! the advertiser, the registry and the event sink. Every operation takes
//! `&self`, so one controller can be shared across tasks behind an `Arc`.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acceptor::Acceptor;
use crate::advertising::{NoopAdvertiser, ServiceAdvertiser, ServiceRecord};
use crate::config::{EngineConfig, ServerConfig};
use crate::error::{ConfigError, ServerError};
use crate::event::{EventSink, EventSubscriber, ServerEvent};
use crate::probe::{CapabilityProbe, StaticProbe};
use crate::registry::{ClientInfo, ClientRegistry};
use crate::state::{ServerState, StateCell};
use crate::transport::{Endpoint, Transport};

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for a [`ServerController`]
pub struct ServerBuilder {
    transport: Arc<dyn Transport>,
    advertiser: Box<dyn ServiceAdvertiser>,
    probe: Arc<dyn CapabilityProbe>,
    engine: EngineConfig,
}

impl ServerBuilder {
    /// Start from `transport` with no advertisement and a probe that reports an enabled adapter
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            advertiser: Box::new(NoopAdvertiser::new()),
            probe: Arc::new(StaticProbe::present()),
            engine: EngineConfig::default(),
        }
    }

    pub fn with_advertiser(mut self, advertiser: impl ServiceAdvertiser + 'static) -> Self {
        self.advertiser = Box::new(advertiser);
        self
    }

    pub fn with_probe(mut self, probe: impl CapabilityProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Validate the engine settings and build the controller
    pub fn build(self) -> Result<ServerController, ConfigError> {
        self.engine.validate()?;
        Ok(ServerController::from_parts(
            self.transport,
            self.advertiser,
            self.probe,
            self.engine,
        ))
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Handles of a started server, present only between `start` and `stop`
struct RunningServer {
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<u64>,
    config: ServerConfig,
}

struct Lifecycle {
    advertiser: Box<dyn ServiceAdvertiser>,
    running: Option<RunningServer>,
}

/// Top-level lifecycle state machine and public operations
pub struct ServerController {
    transport: Arc<dyn Transport>,
    probe: Arc<dyn CapabilityProbe>,
    engine: EngineConfig,
    state: Arc<StateCell>,
    registry: Arc<ClientRegistry>,
    events: Arc<EventSink>,
    endpoint: RwLock<Option<Endpoint>>,
    lifecycle: Mutex<Lifecycle>,
}

impl ServerController {
    /// Controller over `transport` with default settings
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_parts(
            Arc::new(transport),
            Box::new(NoopAdvertiser::new()),
            Arc::new(StaticProbe::present()),
            EngineConfig::default(),
        )
    }

    pub fn builder(transport: impl Transport + 'static) -> ServerBuilder {
        ServerBuilder::new(transport)
    }

    fn from_parts(
        transport: Arc<dyn Transport>,
        advertiser: Box<dyn ServiceAdvertiser>,
        probe: Arc<dyn CapabilityProbe>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            transport,
            probe,
            engine,
            state: Arc::new(StateCell::new()),
            registry: Arc::new(ClientRegistry::new()),
            events: Arc::new(EventSink::new()),
            endpoint: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle {
                advertiser,
                running: None,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bind the transport, advertise the service and start accepting connections.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] unless the server is stopped,
    /// and with [`ServerError::Transport`] if the endpoint cannot be set up.
    /// Both failures are also reported as a `ServerError` event. Advertisement
    /// failures are logged and do not fail the start.
    pub async fn start(&self, config: ServerConfig) -> Result<Endpoint, ServerError> {
        if self
            .state
            .transition(ServerState::Stopped, ServerState::Starting)
            .is_err()
        {
            warn!("Start rejected: server is {}", self.state.get());
            self.report_error(ServerError::AlreadyRunning.to_string());
            return Err(ServerError::AlreadyRunning);
        }

        let mut lifecycle = self.lifecycle.lock().await;

        let listener = match self.transport.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{} transport failed to start: {}", self.transport.name(), e);
                self.report_error(e.summary().to_string());
                self.state
                    .transition(ServerState::Starting, ServerState::Stopped)?;
                return Err(e.into());
            }
        };
        let endpoint = listener.local_endpoint();

        let record = ServiceRecord {
            name: config.service_name.clone(),
            uuid: config.service_uuid,
            endpoint,
        };
        match lifecycle.advertiser.register(&record).await {
            Ok(()) => debug!("Service '{}' advertised on {}", record.name, endpoint),
            Err(e) => warn!(
                "Service registration failed, continuing without advertisement: {}",
                e
            ),
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.state
            .transition(ServerState::Starting, ServerState::Running)?;

        let acceptor = Acceptor::new(
            listener,
            self.registry.clone(),
            self.events.clone(),
            self.state.clone(),
            shutdown_rx,
            self.engine.clone(),
        );
        let acceptor = tokio::spawn(acceptor.run());

        lifecycle.running = Some(RunningServer {
            shutdown,
            acceptor,
            config,
        });
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = Some(endpoint);

        info!(
            "Server started on {} ({} transport)",
            endpoint,
            self.transport.name()
        );
        Ok(endpoint)
    }

    /// Stop the server. No-op when already stopped.
    ///
    /// Returns only after the accept loop and every session worker have exited,
    /// so no further events originate from this server once it returns.
    pub async fn stop(&self) {
        if self.state.get() == ServerState::Stopped {
            debug!("Stop requested while already stopped");
            return;
        }

        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            return;
        };

        if let Err(e) = self
            .state
            .transition(ServerState::Running, ServerState::Stopping)
        {
            warn!("Unexpected state during stop: {}", e);
        }

        running.shutdown.send_replace(true);
        let closed = self.registry.clear_and_close().await;
        debug!("Closed {} session(s) for shutdown", closed);

        match running.acceptor.await {
            Ok(accepted) => debug!("Acceptor exited after {} connection(s)", accepted),
            Err(e) => error!("Acceptor task failed: {}", e),
        }

        if let Err(e) = lifecycle.advertiser.unregister().await {
            warn!(
                "Failed to withdraw service '{}': {}",
                running.config.service_name, e
            );
        }

        self.endpoint
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Err(e) = self
            .state
            .transition(ServerState::Stopping, ServerState::Stopped)
        {
            warn!("Unexpected state after stop: {}", e);
        }
        info!("Server stopped");
    }

    // ------------------------------------------------------------------------
    // Client operations
    // ------------------------------------------------------------------------

    /// Write `text` to every connected client, returning how many received it.
    ///
    /// Writes run concurrently, outside the registry lock, each bounded by the
    /// configured write timeout. A failed write does not stop delivery to the
    /// others and does not remove the failing session.
    pub async fn send_message(&self, text: &str) -> Result<usize, ServerError> {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            debug!("Broadcast skipped: no connected clients");
            return Err(ServerError::NoClients);
        }

        let bytes = text.as_bytes();
        let timeout = self.engine.write_timeout;
        let results = join_all(sessions.iter().map(|session| async move {
            (session.address(), session.send(bytes, timeout).await)
        }))
        .await;

        let attempted = results.len();
        let mut failed = 0;
        for (address, result) in results {
            if let Err(e) = result {
                warn!("Send to {} failed: {}", address, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ServerError::PartialDelivery { failed, attempted });
        }
        debug!("Broadcast {} bytes to {} client(s)", bytes.len(), attempted);
        Ok(attempted)
    }

    /// Close every client connection and empty the registry.
    ///
    /// Each session's read loop reports its own `ClientDisconnected`.
    pub async fn disconnect_clients(&self) -> usize {
        let closed = self.registry.clear_and_close().await;
        info!("Disconnected {} client(s)", closed);
        closed
    }

    // ------------------------------------------------------------------------
    // Capability probing
    // ------------------------------------------------------------------------

    /// Whether an adapter is present; false if it cannot be determined
    pub async fn is_service_available(&self) -> bool {
        self.probe.is_available().await.unwrap_or_else(|e| {
            warn!("Availability probe failed: {}", e);
            false
        })
    }

    /// Whether the adapter is powered; false if it cannot be determined
    pub async fn is_service_enabled(&self) -> bool {
        self.probe.is_enabled().await.unwrap_or_else(|e| {
            warn!("Enabled probe failed: {}", e);
            false
        })
    }

    // ------------------------------------------------------------------------
    // Events and accessors
    // ------------------------------------------------------------------------

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Attach `subscriber`, replacing any previous one
    pub fn subscribe(&self, subscriber: impl EventSubscriber + 'static) {
        self.events.subscribe(subscriber);
    }

    /// Attach a fresh channel subscriber and return its receiver
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.events.subscribe_channel()
    }

    pub fn unsubscribe(&self) {
        self.events.unsubscribe();
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Endpoint the server is listening on, while started
    pub fn endpoint(&self) -> Option<Endpoint> {
        *self.endpoint.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    /// Snapshot of connected clients, oldest first
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.registry
            .snapshot()
            .await
            .iter()
            .map(|session| session.info())
            .collect()
    }

    fn report_error(&self, detail: String) {
        self.events.emit(ServerEvent::ServerError { detail });
    }
}

impl Drop for ServerController {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().running.take() {
            // Workers observe the flag and close their own connections
            running.shutdown.send_replace(true);
            debug!("Controller dropped while running, shutdown signalled");
        }
    }
}

impl std::fmt::Debug for ServerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerController")
            .field("transport", &self.transport.name())
            .field("state", &self.state.get())
            .field("endpoint", &self.endpoint())
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdvertiseError, ProbeError};
    use crate::transport::MemoryTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RejectingAdvertiser;

    #[async_trait]
    impl ServiceAdvertiser for RejectingAdvertiser {
        async fn register(&mut self, _record: &ServiceRecord) -> Result<(), AdvertiseError> {
            Err(AdvertiseError::Rejected("no sdp server".into()))
        }

        async fn unregister(&mut self) -> Result<(), AdvertiseError> {
            Ok(())
        }

        fn is_registered(&self) -> bool {
            false
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl CapabilityProbe for FailingProbe {
        async fn is_available(&self) -> Result<bool, ProbeError> {
            Err(ProbeError::Failed("adapter gone".into()))
        }

        async fn is_enabled(&self) -> Result<bool, ProbeError> {
            Err(ProbeError::Failed("adapter gone".into()))
        }
    }

    #[derive(Clone, Default)]
    struct TrackingAdvertiser {
        registered: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceAdvertiser for TrackingAdvertiser {
        async fn register(&mut self, _record: &ServiceRecord) -> Result<(), AdvertiseError> {
            self.registered.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn unregister(&mut self) -> Result<(), AdvertiseError> {
            self.registered.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_registered(&self) -> bool {
            self.registered.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let controller = ServerController::new(MemoryTransport::new());
        assert_eq!(controller.state(), ServerState::Stopped);

        let endpoint = controller.start(ServerConfig::default()).await.unwrap();
        assert_eq!(controller.state(), ServerState::Running);
        assert_eq!(controller.endpoint(), Some(endpoint));

        controller.stop().await;
        assert_eq!(controller.state(), ServerState::Stopped);
        assert_eq!(controller.endpoint(), None);

        // Restart after a clean stop
        controller.start(ServerConfig::default()).await.unwrap();
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_reports_and_returns_to_stopped() {
        let transport = MemoryTransport::new();
        transport.set_fail_bind(true);
        let controller = ServerController::new(transport);
        let mut events = controller.subscribe_channel();

        let err = controller.start(ServerConfig::default()).await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
        assert_eq!(controller.state(), ServerState::Stopped);
        assert_eq!(
            events.try_recv().unwrap(),
            ServerEvent::ServerError {
                detail: "Failed to bind socket".into()
            }
        );
    }

    #[tokio::test]
    async fn test_advertisement_failure_is_not_fatal() {
        let controller = ServerController::builder(MemoryTransport::new())
            .with_advertiser(RejectingAdvertiser)
            .build()
            .unwrap();
        let mut events = controller.subscribe_channel();

        assert!(controller.start(ServerConfig::default()).await.is_ok());
        assert!(controller.is_running());
        assert!(events.try_recv().is_err());
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_withdraws_advertisement() {
        let advertiser = TrackingAdvertiser::default();
        let registered = advertiser.registered.clone();
        let controller = ServerController::builder(MemoryTransport::new())
            .with_advertiser(advertiser)
            .build()
            .unwrap();

        controller.start(ServerConfig::default()).await.unwrap();
        assert!(registered.load(Ordering::SeqCst));
        controller.stop().await;
        assert!(!registered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_probe_failure_reads_as_false() {
        let controller = ServerController::builder(MemoryTransport::new())
            .with_probe(FailingProbe)
            .build()
            .unwrap();
        assert!(!controller.is_service_available().await);
        assert!(!controller.is_service_enabled().await);

        let controller = ServerController::builder(MemoryTransport::new())
            .with_probe(StaticProbe::new(true, false))
            .build()
            .unwrap();
        assert!(controller.is_service_available().await);
        assert!(!controller.is_service_enabled().await);
    }

    #[test]
    fn test_builder_rejects_invalid_engine_config() {
        let result = ServerController::builder(MemoryTransport::new())
            .with_engine_config(EngineConfig::new().with_read_buffer_size(0))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidSetting {
                field: "read_buffer_size",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_drop_while_running_releases_listener() {
        let transport = MemoryTransport::new();
        let connector = transport.connector();
        let controller = ServerController::new(transport);
        controller.start(ServerConfig::default()).await.unwrap();
        assert!(connector.is_listening());

        drop(controller);
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while connector.is_listening() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
