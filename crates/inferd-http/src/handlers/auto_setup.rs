//! Auto-setup endpoints: bootstrap status, trigger, agent mappings and
//! workflow validation.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(status).post(trigger))
        .route("/agents", get(agent_mappings))
        .route("/validate-workflow", post(validate_workflow))
}

/// `GET /api/v1/auto-setup`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(state.auto_setup.status_json().await)
}

/// `POST /api/v1/auto-setup`: trigger the bootstrap.
pub async fn trigger(State(state): State<AppState>) -> Json<Value> {
    let success = state.auto_setup.perform_auto_setup().await;
    let mut status = state.auto_setup.status_json().await;
    if let Some(object) = status.as_object_mut() {
        object.insert("setup_succeeded".to_string(), Value::Bool(success));
    }
    Json(status)
}

/// `GET /api/v1/auto-setup/agents`
pub async fn agent_mappings(State(state): State<AppState>) -> Json<Value> {
    state.auto_setup.refresh_agent_cache();
    Json(json!({
        "mappings": state.auto_setup.agent_mappings(),
        "available_agents": state.auto_setup.available_agent_names(),
    }))
}

/// `POST /api/v1/auto-setup/validate-workflow`
pub async fn validate_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<Value>,
) -> Json<Value> {
    Json(state.auto_setup.validate_workflow(&workflow))
}
