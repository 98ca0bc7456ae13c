//! Sequential workflow endpoints.
//!
//! Agent names in step definitions are auto-mapped to UUIDs through the
//! auto-setup index; unresolved names are rejected with the list of
//! available agents.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use inferd_agent::{SequentialStep, SequentialWorkflow};

use crate::dto::{
    ExecuteWorkflowRequest, SequentialWorkflowDto, agent_data_from_value, sequential_result_json,
};
use crate::error::HttpError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_workflow).delete(remove))
        .route("/:id/execute", post(execute))
        .route("/:id/execute-async", post(execute_async))
        .route("/:id/result", get(result))
        .route("/:id/status", get(status))
        .route("/:id/cancel", post(cancel))
}

/// Map agent names to UUIDs in the raw body, then parse it.
fn map_and_parse(
    state: &AppState,
    body: &Value,
) -> Result<SequentialWorkflowDto, Response> {
    let Some(mapped) = state.auto_setup.map_agent_names_in_workflow(body) else {
        let body = json!({
            "error": {
                "message": "workflow references unknown agent names",
                "type": "invalid_request_error",
                "code": "400",
            },
            "available_agents": state.auto_setup.available_agent_names(),
        });
        return Err((StatusCode::BAD_REQUEST, Json(body)).into_response());
    };

    serde_json::from_value(mapped)
        .map_err(|err| HttpError::BadRequest(format!("invalid workflow: {err}")).into_response())
}

fn build_workflow(dto: SequentialWorkflowDto) -> Result<SequentialWorkflow, HttpError> {
    let name = if dto.workflow_name.is_empty() {
        dto.workflow_id.clone()
    } else {
        dto.workflow_name
    };
    let mut workflow = SequentialWorkflow::new(dto.workflow_id, name);
    workflow.description = dto.description;
    workflow.stop_on_failure = dto.stop_on_failure;
    workflow.max_execution_time_seconds = dto.max_execution_time_seconds;
    workflow.global_context = agent_data_from_value(&dto.global_context)?;

    for step_dto in dto.steps {
        let mut step = SequentialStep::new(
            step_dto.step_id,
            step_dto.step_name,
            step_dto.agent_id,
            step_dto.function_name,
        );
        step.parameters = agent_data_from_value(&step_dto.parameters)?;
        step.timeout_seconds = step_dto.timeout_seconds;
        step.max_retries = step_dto.max_retries;
        step.continue_on_failure = step_dto.continue_on_failure;
        workflow.steps.push(step);
    }
    Ok(workflow)
}

fn workflow_json(workflow: &SequentialWorkflow) -> Value {
    json!({
        "workflow_id": workflow.workflow_id,
        "workflow_name": workflow.workflow_name,
        "description": workflow.description,
        "stop_on_failure": workflow.stop_on_failure,
        "max_execution_time_seconds": workflow.max_execution_time_seconds,
        "global_context": workflow.global_context.to_json(),
        "steps": workflow.steps.iter().map(|step| json!({
            "step_id": step.step_id,
            "step_name": step.step_name,
            "agent_id": step.agent_id,
            "function_name": step.function_name,
            "parameters": step.parameters.to_json(),
            "timeout_seconds": step.timeout_seconds,
            "max_retries": step.max_retries,
            "continue_on_failure": step.continue_on_failure,
        })).collect::<Vec<_>>(),
    })
}

/// `POST /api/v1/sequential-workflows`
pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let dto = match map_and_parse(&state, &body) {
        Ok(dto) => dto,
        Err(response) => return response,
    };
    let workflow = match build_workflow(dto) {
        Ok(workflow) => workflow,
        Err(err) => return err.into_response(),
    };

    let workflow_id = workflow.workflow_id.clone();
    match state.sequential.register_workflow(workflow) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "workflow_id": workflow_id, "status": "registered" })),
        )
            .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// `GET /api/v1/sequential-workflows`
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let workflows = state.sequential.list_workflows();
    Json(json!({ "workflows": workflows, "total": workflows.len() }))
}

/// `GET /api/v1/sequential-workflows/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let workflow = state
        .sequential
        .get_workflow(&workflow_id)
        .ok_or_else(|| HttpError::NotFound(format!("workflow '{workflow_id}' not found")))?;
    Ok(Json(workflow_json(&workflow)))
}

/// `DELETE /api/v1/sequential-workflows/{id}`
pub async fn remove(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    state.sequential.remove_workflow(&workflow_id)?;
    Ok(Json(json!({ "workflow_id": workflow_id, "message": "workflow removed" })))
}

/// `POST /api/v1/sequential-workflows/{id}/execute`
pub async fn execute(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    if state.sequential.get_workflow(&workflow_id).is_none() {
        return Err(HttpError::NotFound(format!(
            "workflow '{workflow_id}' not found"
        )));
    }
    let context = agent_data_from_value(&request.context)?;
    let result = state.sequential.execute_workflow(&workflow_id, context).await;
    Ok(Json(sequential_result_json(&result)))
}

/// `POST /api/v1/sequential-workflows/{id}/execute-async`
pub async fn execute_async(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    if state.sequential.get_workflow(&workflow_id).is_none() {
        return Err(HttpError::NotFound(format!(
            "workflow '{workflow_id}' not found"
        )));
    }
    let context = agent_data_from_value(&request.context)?;
    let execution_id = state.sequential.execute_workflow_async(&workflow_id, context);
    Ok(Json(json!({
        "workflow_id": workflow_id,
        "execution_id": execution_id,
        "status": "started",
    })))
}

/// `GET /api/v1/sequential-workflows/{id}/result`
pub async fn result(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let result = state
        .sequential
        .get_workflow_result(&workflow_id)
        .ok_or_else(|| {
            HttpError::NotFound(format!("no result for workflow '{workflow_id}'"))
        })?;
    Ok(Json(sequential_result_json(&result)))
}

/// `GET /api/v1/sequential-workflows/{id}/status`
pub async fn status(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Json<Value> {
    Json(json!(state.sequential.workflow_status(&workflow_id)))
}

/// `POST /api/v1/sequential-workflows/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    if state.sequential.cancel_workflow(&workflow_id) {
        Ok(Json(json!({ "workflow_id": workflow_id, "cancelled": true })))
    } else {
        Err(HttpError::NotFound(format!(
            "workflow '{workflow_id}' not found"
        )))
    }
}
