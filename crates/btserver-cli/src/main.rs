//! btserver - message server host

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use btserver_cli::{
    app::{build_controller, build_probe},
    bridge::{Bridge, BridgeExit},
    cli::{Cli, Commands, ServeArgs},
    config::AppConfig,
    signals::wait_for_termination,
};
use btserver_core::CommandDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the bridge protocol
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    match cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::Probe => probe(config).await,
    }
}

async fn serve(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    config.apply_overrides(&args);
    config.validate().context("invalid configuration")?;

    let controller = Arc::new(build_controller(&config)?);
    let dispatcher = CommandDispatcher::new(controller.clone());
    let bridge = Bridge::new(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    if args.autostart {
        let endpoint = controller
            .start(config.server_config()?)
            .await
            .context("failed to start server")?;
        info!("Serving '{}' on {}", config.service.name, endpoint);
    }

    let shutdown = async {
        if let Err(e) = wait_for_termination().await {
            error!("Signal handling unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let exit = bridge.run(shutdown).await?;
    info!("btserver exited ({:?})", exit);
    if exit == BridgeExit::Shutdown {
        // The blocking stdin reader would otherwise keep the runtime alive
        std::process::exit(0);
    }
    Ok(())
}

async fn probe(config: AppConfig) -> anyhow::Result<()> {
    let probe = build_probe(&config)?;
    let available = probe.is_available().await.unwrap_or_else(|e| {
        error!("Availability probe failed: {}", e);
        false
    });
    let enabled = probe.is_enabled().await.unwrap_or_else(|e| {
        error!("Enabled probe failed: {}", e);
        false
    });
    println!(
        "{}",
        serde_json::json!({ "available": available, "enabled": enabled })
    );
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
            .with_context(|| format!("failed to load {}", config_path))
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
