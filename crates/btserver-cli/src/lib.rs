//! btserver CLI library
//!
//! Assembles a server controller from configuration and exposes it to a
//! line-oriented caller through the JSON bridge.

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod signals;

pub use bridge::{Bridge, BridgeExit, OutputLine, Request};
pub use cli::{Cli, Commands, ServeArgs};
pub use config::{AppConfig, TransportKind};
pub use error::{CliError, Result};
