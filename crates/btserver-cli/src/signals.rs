//! Termination signal handling for graceful shutdown

use tokio::signal;
use tracing::info;

/// Resolves when the process is asked to terminate (SIGINT or SIGTERM on
/// Unix, Ctrl+C elsewhere)
pub async fn wait_for_termination() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
