//! HTTP endpoints of the hub

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::configuration::VersionedConfiguration;
use super::error::{ApiError, ApiResult};
use super::state::HubState;
use crate::ConfigurationMessage;
use crate::actors::ServerStatus;
use crate::logging::LogMessage;
use crate::storage::{HealthStatus, MetricsRow};

const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage: HealthStatus,
}

/// GET /api/v1/health
///
/// Reports `degraded` when the repository is unreachable
pub async fn health_check(State(state): State<HubState>) -> Json<HealthResponse> {
    let storage = match state.repository.health_check().await {
        Ok(status) => status,
        Err(e) => HealthStatus {
            healthy: false,
            message: e.to_string(),
            metadata: Default::default(),
        },
    };

    Json(HealthResponse {
        status: if storage.healthy { "ok" } else { "degraded" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        storage,
    })
}

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<HubState>) -> ApiResult<Json<Value>> {
    let processor = state.processor.get_stats().await.unwrap_or_default();
    let configuration = state.configuration.current();
    let now = Utc::now();

    Ok(Json(json!({
        "timestamp": now.to_rfc3339(),
        "processor": processor,
        "connected_servers": state
            .report
            .connected_count(configuration.configuration.update_interval(), now),
        "configuration_version": configuration.version,
    })))
}

/// GET /api/v1/metrics
pub async fn list_metrics(State(state): State<HubState>) -> ApiResult<Json<Vec<MetricsRow>>> {
    Ok(Json(state.repository.get_all().await?))
}

/// GET /api/v1/metrics/latest
///
/// Newest stored reading of every source address
pub async fn latest_metrics(State(state): State<HubState>) -> ApiResult<Json<Vec<MetricsRow>>> {
    Ok(Json(state.repository.get_latest_per_source().await?))
}

/// GET /api/v1/metrics/:id
pub async fn get_metrics(
    State(state): State<HubState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<MetricsRow>> {
    Ok(Json(state.repository.get(id).await?))
}

/// GET /api/v1/report
///
/// Live view of connected agents; readings older than one and a half update
/// intervals are flagged as lost
pub async fn get_report(State(state): State<HubState>) -> Json<Vec<ServerStatus>> {
    let interval = state.configuration.current().configuration.update_interval();
    Json(state.report.servers(interval, Utc::now()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/logs?limit=N
pub async fn get_logs(
    State(state): State<HubState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogMessage>> {
    Json(state.logs.recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

/// GET /api/v1/configuration
pub async fn get_configuration(State(state): State<HubState>) -> Json<VersionedConfiguration> {
    Json(state.configuration.current())
}

/// PUT /api/v1/configuration
///
/// Replaces the configuration and pushes it to every connected agent
pub async fn put_configuration(
    State(state): State<HubState>,
    Json(configuration): Json<ConfigurationMessage>,
) -> ApiResult<Json<VersionedConfiguration>> {
    let replaced = state
        .configuration
        .replace(configuration)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(replaced))
}
