//! Loopback TCP transport for development and tests

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket};
use tracing::debug;

use crate::address::PeerAddress;
use crate::error::TransportError;

use super::{Connection, Endpoint, Transport, TransportListener};

/// Listen backlog, matching the platform default for server sockets
const LISTEN_BACKLOG: u32 = 1024;

// ----------------------------------------------------------------------------
// TCP Transport
// ----------------------------------------------------------------------------

/// TCP stand-in for the radio transport.
///
/// Binds port 0 by default so the OS picks the port, as an RFCOMM server
/// lets the kernel pick its channel.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_addr: SocketAddr,
}

impl TcpTransport {
    /// Loopback transport on an OS-chosen port
    pub fn new() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        }
    }

    /// Transport bound to a specific address
    pub fn with_bind_addr(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Six-byte peer identifier for a TCP peer: IPv4 octets then the big-endian port
pub fn peer_address_for(addr: &SocketAddr) -> PeerAddress {
    let octets = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets(),
            None => {
                let raw = v6.octets();
                [raw[12], raw[13], raw[14], raw[15]]
            }
        },
    };
    let [hi, lo] = addr.port().to_be_bytes();
    PeerAddress::new([octets[0], octets[1], octets[2], octets[3], hi, lo])
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn bind(&self) -> Result<Box<dyn TransportListener>, TransportError> {
        let socket = match self.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(TransportError::Socket)?;

        socket.set_reuseaddr(true).map_err(TransportError::Socket)?;
        socket.bind(self.bind_addr).map_err(TransportError::Bind)?;
        let local = socket.local_addr().map_err(TransportError::LocalAddress)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(TransportError::Listen)?;

        debug!("TCP listener bound on {}", local);
        Ok(Box::new(TcpServerListener { listener, local }))
    }
}

struct TcpServerListener {
    listener: TcpListener,
    local: SocketAddr,
}

#[async_trait]
impl TransportListener for TcpServerListener {
    fn local_endpoint(&self) -> Endpoint {
        Endpoint::Tcp(self.local)
    }

    async fn accept(&self) -> io::Result<Connection> {
        let (stream, remote) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Connection::from_stream(peer_address_for(&remote), stream))
    }
}
