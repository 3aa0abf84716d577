//! Signal handling for graceful shutdown of the `serve` mode.

use tracing::info;

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// If a handler cannot be installed the corresponding signal is ignored and
/// the remaining ones are still awaited.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    async fn recv(kind: SignalKind, name: &'static str) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(message = "Signal received.", signal = name);
            }
            Err(e) => {
                tracing::warn!(signal = name, error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    }

    tokio::select! {
        _ = recv(SignalKind::interrupt(), "SIGINT") => {}
        _ = recv(SignalKind::terminate(), "SIGTERM") => {}
        _ = recv(SignalKind::quit(), "SIGQUIT") => {}
    }
}

/// Wait for Ctrl-C on non-Unix platforms.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(message = "Signal received.", signal = "ctrl-c");
    }
}
