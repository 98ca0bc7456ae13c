//! Agent fleet endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use inferd_agent::AgentCore;
use inferd_core::config::AgentConfig;
use inferd_core::data::AgentData;
use inferd_core::message::AgentMessage;

use crate::dto::{
    AgentMessageRequest, AgentTextRequest, CreateAgentRequest, ExecuteFunctionRequest,
    agent_data_from_value,
};
use crate::error::HttpError;
use crate::state::AppState;

/// Resolve an agent by id, falling back to its configured name.
fn resolve_agent(state: &AppState, key: &str) -> Result<Arc<AgentCore>, HttpError> {
    state
        .agents
        .get_agent(key)
        .or_else(|| state.agents.find_by_name(key))
        .ok_or_else(|| HttpError::NotFound(format!("agent '{key}' not found")))
}

fn agent_json(agent: &AgentCore) -> Value {
    json!({
        "id": agent.id(),
        "name": agent.name(),
        "type": agent.agent_type(),
        "running": agent.is_running(),
        "capabilities": agent.capabilities(),
        "functions": agent.registry().names(),
    })
}

/// `GET /v1/agents`
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<Value> = state
        .agents
        .list_agents()
        .iter()
        .filter_map(|id| state.agents.get_agent(id))
        .map(|agent| agent_json(&agent))
        .collect();
    Json(json!({ "agents": agents, "total": agents.len() }))
}

/// `POST /v1/agents`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<Response, HttpError> {
    let config = AgentConfig {
        name: request.name,
        agent_type: request.agent_type,
        role: request.role,
        system_prompt: request.system_prompt,
        capabilities: request.capabilities,
        functions: request.functions,
        auto_start: request.auto_start,
        ..AgentConfig::default()
    };

    let agent_id = state.agents.create_agent(&config)?;
    if config.auto_start {
        state.agents.start_agent(&agent_id)?;
    }
    // New names become addressable in workflow auto-mapping immediately.
    state.auto_setup.refresh_agent_cache();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "agent_id": agent_id, "name": config.name })),
    )
        .into_response())
}

/// `GET /v1/agents/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let agent = resolve_agent(&state, &agent_id)?;
    Ok(Json(agent_json(&agent)))
}

/// `DELETE /v1/agents/{id}`
pub async fn remove(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let agent = resolve_agent(&state, &agent_id)?;
    let id = agent.id().to_string();
    state.agents.delete_agent(&id).await?;
    state.auto_setup.refresh_agent_cache();
    Ok(Json(json!({ "agent_id": id, "message": "agent deleted" })))
}

/// `POST /v1/agents/{id}/execute`
pub async fn execute(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<ExecuteFunctionRequest>,
) -> Result<Json<Value>, HttpError> {
    if request.function.is_empty() {
        return Err(HttpError::BadRequest("function is required".to_string()));
    }
    let agent = resolve_agent(&state, &agent_id)?;
    let params = agent_data_from_value(&request.parameters)?;

    let result = agent.execute_function(&request.function, &params).await;
    Ok(Json(
        serde_json::to_value(&result).map_err(|err| HttpError::Internal(err.to_string()))?,
    ))
}

/// Run the first function the agent actually has from a preference list.
async fn execute_shortcut(
    state: &AppState,
    agent_key: &str,
    preferences: &[&str],
    params: AgentData,
) -> Result<Json<Value>, HttpError> {
    let agent = resolve_agent(state, agent_key)?;
    let function = preferences
        .iter()
        .find(|name| agent.registry().contains(name))
        .ok_or_else(|| {
            HttpError::BadRequest(format!(
                "agent '{}' has none of the functions {preferences:?}",
                agent.name()
            ))
        })?;

    let result = agent.execute_function(function, &params).await;
    Ok(Json(json!({
        "function": function,
        "result": serde_json::to_value(&result)
            .map_err(|err| HttpError::Internal(err.to_string()))?,
    })))
}

/// `POST /v1/agents/{id}/chat`
pub async fn chat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<AgentTextRequest>,
) -> Result<Json<Value>, HttpError> {
    let params = AgentData::new()
        .with("message", request.message.clone())
        .with("text", request.message.clone())
        .with("prompt", request.message);
    execute_shortcut(&state, &agent_id, &["chat", "llm", "inference", "echo"], params).await
}

/// `POST /v1/agents/{id}/generate`
pub async fn generate(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<AgentTextRequest>,
) -> Result<Json<Value>, HttpError> {
    let params = AgentData::new()
        .with("prompt", request.message.clone())
        .with("text", request.message);
    execute_shortcut(&state, &agent_id, &["generate", "inference", "llm", "echo"], params).await
}

/// `POST /v1/agents/{id}/respond`
pub async fn respond(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<AgentTextRequest>,
) -> Result<Json<Value>, HttpError> {
    let params = AgentData::new()
        .with("message", request.message.clone())
        .with("text", request.message);
    execute_shortcut(
        &state,
        &agent_id,
        &["respond", "text_analysis", "llm", "echo"],
        params,
    )
    .await
}

/// `POST /v1/agents/{id}/message`: deliver a raw message to the agent's
/// mailbox through the router.
pub async fn message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<AgentMessageRequest>,
) -> Result<Json<Value>, HttpError> {
    let agent = resolve_agent(&state, &agent_id)?;
    let payload = agent_data_from_value(&request.payload)?;

    let message =
        AgentMessage::new("http-api", agent.id(), &request.message_type).with_payload(payload);
    let message_id = message.id;
    state.agents.router().route_message(message);

    Ok(Json(json!({
        "message_id": message_id,
        "to_agent": agent.id(),
        "queued": true,
    })))
}

/// `GET /v1/agents/system/status`
pub async fn system_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.agents.system_status();
    Json(json!({
        "total_agents": status.total_agents,
        "running_agents": status.running_agents,
        "loaded_functions": status.loaded_functions,
        "worker_threads": status.worker_threads,
        "log_level": status.log_level,
    }))
}
