//! Hub side: HTTP API and the agent WebSocket endpoint
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check including the repository
//! - `GET /api/v1/stats` - Processor counters and connection count
//! - `GET /api/v1/metrics` - Every stored reading
//! - `GET /api/v1/metrics/latest` - Newest reading per source address
//! - `GET /api/v1/metrics/:id` - One stored reading
//! - `GET /api/v1/report` - Live status of connected agents
//! - `GET /api/v1/logs` - Recent hub log lines
//! - `GET|PUT /api/v1/configuration` - Agent configuration
//! - `WS /monitorhub` - Agent connections

pub mod configuration;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod websocket;

pub use configuration::{ConfigurationStore, VersionedConfiguration};
pub use error::{ApiError, ApiResult};
pub use pipeline::Pipeline;
pub use state::HubState;

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub fn router(state: HubState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health_check))
        .route("/api/v1/stats", get(routes::get_stats))
        .route("/api/v1/metrics", get(routes::list_metrics))
        .route("/api/v1/metrics/latest", get(routes::latest_metrics))
        .route("/api/v1/metrics/:id", get(routes::get_metrics))
        .route("/api/v1/report", get(routes::get_report))
        .route("/api/v1/logs", get(routes::get_logs))
        .route(
            "/api/v1/configuration",
            get(routes::get_configuration).put(routes::put_configuration),
        )
        .route("/monitorhub", get(websocket::monitor_hub_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the hub server
///
/// Binds `bind_addr` and serves until `cancel` fires. Returns the bound
/// address, which differs from `bind_addr` when port 0 was requested.
pub async fn spawn_hub_server(
    bind_addr: SocketAddr,
    state: HubState,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    info!("starting hub server on {bind_addr}");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("hub server listening on {addr}");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!("hub server error: {e}");
        }
    });

    Ok((addr, handle))
}
