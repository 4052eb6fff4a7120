pub mod error;
pub mod pagination;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::Router;
use tower_http::cors::CorsLayer;

pub use state::AppState;

/// Builds the full HTTP surface over an already-opened `AppState`. Kept
/// separate from `serve` so integration tests can mount the router on an
/// in-memory `tower::ServiceExt::oneshot` client without binding a socket.
pub fn app(state: AppState) -> Router {
    Router::new().merge(routes::router()).layer(CorsLayer::permissive()).with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "orka-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
