//! Command-line interface definitions and parsing

use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::TransportKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server, reading JSON method calls from stdin and writing
    /// responses and events to stdout
    Serve(ServeArgs),
    /// Report whether a Bluetooth adapter is present and powered
    Probe,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Transport to listen on
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Local address for the tcp transport
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Service name to advertise
    #[arg(short, long)]
    pub name: Option<String>,

    /// Service class UUID to advertise
    #[arg(short, long)]
    pub uuid: Option<String>,

    /// Start the server immediately instead of waiting for startServer
    #[arg(long)]
    pub autostart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_arguments() {
        let cli = Cli::parse_from([
            "btserver",
            "serve",
            "--transport",
            "tcp",
            "--bind",
            "127.0.0.1:7000",
            "--name",
            "Pen",
            "--autostart",
            "-v",
        ]);
        assert!(cli.verbose);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.transport, Some(TransportKind::Tcp));
        assert_eq!(args.bind, Some("127.0.0.1:7000".parse().unwrap()));
        assert_eq!(args.name.as_deref(), Some("Pen"));
        assert!(args.autostart);
    }

    #[test]
    fn test_probe_with_global_config() {
        let cli = Cli::parse_from(["btserver", "probe", "--config", "server.toml"]);
        assert!(matches!(cli.command, Commands::Probe));
        assert_eq!(cli.config.as_deref(), Some("server.toml"));
    }
}
