//! Reliable byte-stream transports the server listens on
//!
//! A [`Transport`] binds a listening endpoint; its [`TransportListener`] hands
//! out accepted [`Connection`]s already split into read and write halves so a
//! session can read while broadcasts write. Dropping a listener closes the
//! listening endpoint.

pub mod memory;
pub mod tcp;

use core::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::address::PeerAddress;
use crate::error::TransportError;

pub use memory::{MemoryConnector, MemoryTransport};
pub use tcp::TcpTransport;

/// Read half of an accepted connection
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Write half of an accepted connection
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Local endpoint a listener was bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// RFCOMM server channel
    Rfcomm { channel: u8 },
    /// TCP socket address
    Tcp(SocketAddr),
    /// In-process listener
    Memory { id: u64 },
}

impl Endpoint {
    /// Port or channel number peers connect to
    pub fn port(&self) -> u64 {
        match self {
            Endpoint::Rfcomm { channel } => u64::from(*channel),
            Endpoint::Tcp(addr) => u64::from(addr.port()),
            Endpoint::Memory { id } => *id,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Rfcomm { channel } => write!(f, "rfcomm channel {}", channel),
            Endpoint::Tcp(addr) => write!(f, "tcp {}", addr),
            Endpoint::Memory { id } => write!(f, "memory #{}", id),
        }
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// An accepted peer connection
pub struct Connection {
    /// Link-layer address of the peer
    pub address: PeerAddress,
    /// Peer display name, when the transport knows it
    pub name: Option<String>,
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Connection {
    /// Split any bidirectional stream into a connection
    pub fn from_stream<S>(address: PeerAddress, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            address,
            name: None,
            reader: Box::pin(reader),
            writer: Box::pin(writer),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Factory for listening endpoints
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Bind to an OS-chosen endpoint on the local adapter and start listening
    async fn bind(&self) -> Result<Box<dyn TransportListener>, TransportError>;
}

/// A bound, listening endpoint
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Endpoint assigned at bind time
    fn local_endpoint(&self) -> Endpoint;

    /// Wait for the next incoming connection.
    ///
    /// The acceptor polls each call to completion, so an implementation may
    /// keep awaiting after it has taken a connection from the OS.
    async fn accept(&self) -> io::Result<Connection>;
}
