//! Metrics endpoints.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /completion-metrics`: aggregated and per-engine TPS/TTFT/RPS.
pub async fn completion(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    let metrics = state.monitor.completion_metrics();
    Ok(Json(
        serde_json::to_value(&metrics).map_err(|err| HttpError::Internal(err.to_string()))?,
    ))
}

/// `GET /metrics` and `GET /v1/metrics`: system summary plus completion
/// metrics. Hardware probes are external collaborators; the system section
/// reports what the core itself knows.
pub async fn combined(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    let completion = state.monitor.completion_metrics();
    let engines = state.node_manager.list_engine_ids().await;
    let agents = state.agents.system_status();

    Ok(Json(json!({
        "system": {
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "engine_count": engines.len(),
            "agent_count": agents.total_agents,
            "running_agents": agents.running_agents,
        },
        "completion": serde_json::to_value(&completion)
            .map_err(|err| HttpError::Internal(err.to_string()))?,
    })))
}
