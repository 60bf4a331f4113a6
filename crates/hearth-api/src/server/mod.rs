//! HTTP server for the controller.

pub mod router;
pub mod types;

pub use router::create_router_with_state;
pub use types::{ServerState, MAX_REQUEST_BODY_SIZE};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hearth_devices::Controller;
use tokio::net::TcpListener;

/// Run the web server until Ctrl+C or SIGTERM, then stop polling.
pub async fn run(bind: SocketAddr, controller: Arc<Controller>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");
    serve(listener, controller, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves.
///
/// Polling is started here and stopped once the server has drained, giving
/// an in-flight cycle the configured grace period.
pub async fn serve(
    listener: TcpListener,
    controller: Arc<Controller>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    controller.start_polling();
    let app = create_router_with_state(ServerState::new(controller.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    if !controller.shutdown().await {
        tracing::warn!("Poll cycle did not finish within the grace period");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
