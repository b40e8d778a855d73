//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - SIGTERM/SIGINT trigger graceful shutdown
//! - SIGHUP re-reads the configuration file, not shutdown

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Spawn the signal loop. `on_reload` runs for every SIGHUP.
pub fn spawn_signal_handlers<F>(shutdown: Shutdown, on_reload: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    tokio::spawn(async move {
        wait_for_signals(&on_reload).await;
        shutdown.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_signals<F: Fn()>(on_reload: &F) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(terminate), Ok(hangup)) => (terminate, hangup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Signal handlers unavailable, only Ctrl-C stops the service");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(signal = "SIGINT", "Signal received");
                return;
            }
            _ = terminate.recv() => {
                tracing::info!(signal = "SIGTERM", "Signal received");
                return;
            }
            _ = hangup.recv() => {
                tracing::info!(signal = "SIGHUP", "Signal received, re-reading configuration");
                on_reload();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals<F: Fn()>(_on_reload: &F) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(signal = "ctrl-c", "Signal received");
}
