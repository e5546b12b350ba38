//! Connection-oriented message server engine
//!
//! This crate accepts peer connections over a reliable byte-stream transport,
//! runs one read loop per connection, relays inbound messages and connection
//! lifecycle changes to a single event subscriber, and broadcasts outbound text
//! to every connected peer. The radio-specific pieces (RFCOMM sockets, SDP
//! records, adapter probing) plug in through the [`Transport`],
//! [`ServiceAdvertiser`] and [`CapabilityProbe`] traits.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod acceptor;
pub mod address;
pub mod advertising;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod probe;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use address::PeerAddress;
pub use advertising::{NoopAdvertiser, ServiceAdvertiser, ServiceRecord};
pub use command::{CommandDispatcher, Method, MethodCall, MethodResponse};
pub use config::{EngineConfig, ServerConfig, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};
pub use controller::{ServerBuilder, ServerController};
pub use error::{
    AddressParseError, AdvertiseError, CommandError, ConfigError, ProbeError, Result, ServerError,
    TransportError,
};
pub use event::{EventKind, EventRecord, EventSink, EventSubscriber, ServerEvent};
pub use probe::{CapabilityProbe, StaticProbe};
pub use registry::{ClientInfo, ClientRegistry, ClientSession, SessionId};
pub use state::{ServerState, StateCell};
pub use transport::memory::PeerOptions;
pub use transport::{
    BoxedReader, BoxedWriter, Connection, Endpoint, MemoryConnector, MemoryTransport, TcpTransport,
    Transport, TransportListener,
};
