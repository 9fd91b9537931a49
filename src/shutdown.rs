//! Graceful shutdown signal. Cancels a shared token on SIGINT/SIGTERM so the
//! axum server and every worker loop can wind down in step instead of being
//! killed mid-job.

use tokio_util::sync::CancellationToken;

pub async fn listen_for_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    token.cancel();
}
