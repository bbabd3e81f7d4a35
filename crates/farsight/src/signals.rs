//! Signal handling for graceful shutdown.
//!
//! Listens for termination signals (SIGINT and SIGTERM on Unix, Ctrl+C on
//! Windows) and resolves once one arrives. The demo loop races against
//! this future.

use anyhow::Result;
use tokio::signal;
use tracing::info;

/// Resolves when a shutdown signal is received.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    info!("📡 Received shutdown signal - stopping");
    Ok(())
}
