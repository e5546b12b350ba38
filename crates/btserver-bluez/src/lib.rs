//! BlueZ backend for the btserver engine
//!
//! Provides the RFCOMM [`Transport`](btserver_core::Transport), an SDP
//! [`ServiceAdvertiser`](btserver_core::ServiceAdvertiser) backed by BlueZ
//! profile registration, and an adapter [`CapabilityProbe`](btserver_core::CapabilityProbe).
//! On platforms without BlueZ the same types exist but report the backend as
//! unsupported.

pub mod error;

#[cfg(target_os = "linux")]
mod adapter;
#[cfg(target_os = "linux")]
mod rfcomm;
#[cfg(target_os = "linux")]
mod sdp;

#[cfg(not(target_os = "linux"))]
mod fallback;

pub use error::BluezError;

#[cfg(target_os = "linux")]
pub use adapter::AdapterProbe;
#[cfg(target_os = "linux")]
pub use rfcomm::{peer_address, RfcommTransport};
#[cfg(target_os = "linux")]
pub use sdp::SdpAdvertiser;

#[cfg(not(target_os = "linux"))]
pub use fallback::{AdapterProbe, RfcommTransport, SdpAdvertiser};
