//! HTTP surface of both nodes
//!
//! ## Endpoints
//!
//! Both nodes:
//! - `GET /-/healthy` - Liveness check
//! - `GET /metrics` - Operational metrics in the Prometheus text format
//!
//! Query node:
//! - `GET /api/v1/stores` - Stores that answered their last probe
//!
//! Rule node:
//! - `POST /-/reload` - Request a rule reload
//! - `GET /api/v1/rules` - Installed rule groups and alert states

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::{QueryApiState, RuleApiState};

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Router of the query node
pub fn query_router(state: QueryApiState) -> Router {
    Router::new()
        .route("/-/healthy", get(routes::health::healthy))
        .route("/metrics", get(routes::health::export_metrics))
        .route("/api/v1/stores", get(routes::stores::list_stores))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router of the rule node
pub fn rule_router(state: RuleApiState) -> Router {
    Router::new()
        .route("/-/healthy", get(routes::health::healthy))
        .route("/-/reload", post(routes::rules::reload))
        .route("/metrics", get(routes::health::export_metrics))
        .route("/api/v1/rules", get(routes::rules::list_groups))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
