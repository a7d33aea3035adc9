//! Graceful shutdown on SIGTERM and SIGINT.

use std::time::Duration;

use axum_server::Handle;

use crate::config::SHUTDOWN_GRACE_SECONDS;

/// Setup graceful shutdown on SIGTERM and SIGINT.
///
/// When either signal is received, every listener will:
/// 1. Stop accepting new connections
/// 2. Wait for existing connections to complete
/// 3. Shutdown gracefully
pub fn setup_shutdown_handler(handles: Vec<Handle>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        for handle in &handles {
            handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECONDS)));
        }
        tracing::info!(
            listeners = handles.len(),
            "Graceful shutdown initiated, waiting up to {} seconds for connections to close",
            SHUTDOWN_GRACE_SECONDS
        );
    });
}
