//! HTTP channel for submitting messages and inspecting the engine.
//!
//! # Endpoints
//!
//! - `GET  /health`  : Liveness probe
//! - `GET  /commands`: Command name → plugin description
//! - `GET  /stats`   : Dispatcher statistics
//! - `POST /messages`: Process one message, returns its outcomes

pub mod routes;

pub use routes::{app_router, AppState, MessageRequest};

use tokio::net::TcpListener;

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("HTTP channel listening on {}", listener.local_addr()?);
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
