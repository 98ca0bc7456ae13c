//! Orchestrator endpoints: DAG workflows, collaboration groups, pipelines
//! and load-balanced dispatch.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use inferd_agent::{
    CollaborationGroup, CollaborationPattern, OrchestratorWorkflow, WorkflowStep,
};

use crate::dto::{
    CollaborationGroupDto, CoordinateRequest, DistributeWorkloadRequest, ExecuteWorkflowRequest,
    OrchestratorWorkflowDto, PipelineRequest, SelectAgentRequest, agent_data_from_value,
    orchestrator_result_json,
};
use crate::error::HttpError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route("/workflows/:id", get(get_workflow).delete(remove_workflow))
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/workflows/:id/execute-async", post(execute_workflow_async))
        .route("/workflows/:id/result", get(workflow_result))
        .route(
            "/collaboration-groups",
            get(list_groups).post(create_group),
        )
        .route("/collaboration-groups/:id", axum::routing::delete(remove_group))
        .route("/collaboration-groups/:id/execute", post(execute_group))
        .route("/coordinate", post(coordinate))
        .route("/pipelines", post(create_pipeline))
        .route("/pipelines/:name/execute", post(execute_pipeline))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/select-agent", post(select_agent))
        .route("/distribute-workload", post(distribute_workload))
        .route("/optimize", post(optimize))
}

fn build_workflow(dto: OrchestratorWorkflowDto) -> Result<OrchestratorWorkflow, HttpError> {
    let mut workflow = OrchestratorWorkflow {
        workflow_id: dto.workflow_id,
        name: dto.workflow_name,
        description: dto.description,
        global_context: agent_data_from_value(&dto.global_context)?,
        steps: Vec::with_capacity(dto.steps.len()),
    };
    for step_dto in dto.steps {
        workflow.steps.push(WorkflowStep {
            step_id: step_dto.step_id,
            agent_id: step_dto.agent_id,
            function_name: step_dto.function_name,
            parameters: agent_data_from_value(&step_dto.parameters)?,
            dependencies: step_dto.dependencies,
            parallel_allowed: step_dto.parallel_allowed,
        });
    }
    Ok(workflow)
}

fn workflow_json(workflow: &OrchestratorWorkflow) -> Value {
    json!({
        "workflow_id": workflow.workflow_id,
        "name": workflow.name,
        "description": workflow.description,
        "global_context": workflow.global_context.to_json(),
        "steps": workflow.steps.iter().map(|step| json!({
            "step_id": step.step_id,
            "agent_id": step.agent_id,
            "function_name": step.function_name,
            "parameters": step.parameters.to_json(),
            "dependencies": step.dependencies,
            "parallel_allowed": step.parallel_allowed,
        })).collect::<Vec<_>>(),
    })
}

/// `POST /api/v1/orchestration/workflows`
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(dto): Json<OrchestratorWorkflowDto>,
) -> Result<Response, HttpError> {
    let workflow = build_workflow(dto)?;
    let workflow_id = workflow.workflow_id.clone();
    state.orchestrator.register_workflow(workflow)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "workflow_id": workflow_id, "status": "registered" })),
    )
        .into_response())
}

/// `GET /api/v1/orchestration/workflows`
pub async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows = state.orchestrator.list_workflows();
    Json(json!({ "workflows": workflows, "total": workflows.len() }))
}

/// `GET /api/v1/orchestration/workflows/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let workflow = state
        .orchestrator
        .get_workflow(&workflow_id)
        .ok_or_else(|| HttpError::NotFound(format!("workflow '{workflow_id}' not found")))?;
    Ok(Json(workflow_json(&workflow)))
}

/// `DELETE /api/v1/orchestration/workflows/{id}`
pub async fn remove_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    state.orchestrator.remove_workflow(&workflow_id)?;
    Ok(Json(json!({ "workflow_id": workflow_id, "message": "workflow removed" })))
}

/// `POST /api/v1/orchestration/workflows/{id}/execute`
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    let context = agent_data_from_value(&request.context)?;
    let result = state.orchestrator.execute_workflow(&workflow_id, context).await?;
    Ok(Json(orchestrator_result_json(&result)))
}

/// `POST /api/v1/orchestration/workflows/{id}/execute-async`
pub async fn execute_workflow_async(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    let context = agent_data_from_value(&request.context)?;
    state
        .orchestrator
        .execute_workflow_async(&workflow_id, context)?;
    Ok(Json(json!({ "workflow_id": workflow_id, "status": "queued" })))
}

/// `GET /api/v1/orchestration/workflows/{id}/result`
pub async fn workflow_result(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let result = state
        .orchestrator
        .get_workflow_result(&workflow_id)
        .ok_or_else(|| {
            HttpError::NotFound(format!("no result for workflow '{workflow_id}'"))
        })?;
    Ok(Json(orchestrator_result_json(&result)))
}

/// `POST /api/v1/orchestration/collaboration-groups`
pub async fn create_group(
    State(state): State<AppState>,
    Json(dto): Json<CollaborationGroupDto>,
) -> Result<Response, HttpError> {
    let pattern = CollaborationPattern::from_str(&dto.pattern)?;
    let mut group = CollaborationGroup::new(&dto.group_id, pattern, dto.agent_ids);
    group.name = dto.name;
    group.consensus_threshold = dto.consensus_threshold;
    group.max_negotiation_rounds = dto.max_negotiation_rounds;

    state.orchestrator.create_collaboration_group(group)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "group_id": dto.group_id, "pattern": pattern.as_str() })),
    )
        .into_response())
}

/// `GET /api/v1/orchestration/collaboration-groups`
pub async fn list_groups(State(state): State<AppState>) -> Json<Value> {
    let groups = state.orchestrator.list_collaboration_groups();
    Json(json!({ "groups": groups, "total": groups.len() }))
}

/// `DELETE /api/v1/orchestration/collaboration-groups/{id}`
pub async fn remove_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    state.orchestrator.remove_collaboration_group(&group_id)?;
    Ok(Json(json!({ "group_id": group_id, "message": "group removed" })))
}

/// `POST /api/v1/orchestration/collaboration-groups/{id}/execute`
pub async fn execute_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    let input = agent_data_from_value(&request.context)?;
    let result = state.orchestrator.execute_collaboration(&group_id, input).await?;
    Ok(Json(json!({ "group_id": group_id, "result": result.to_json() })))
}

/// `POST /api/v1/orchestration/coordinate`
pub async fn coordinate(
    State(state): State<AppState>,
    Json(request): Json<CoordinateRequest>,
) -> Result<Json<Value>, HttpError> {
    let parameters = agent_data_from_value(&request.parameters)?;
    let result = state
        .orchestrator
        .coordinate_agents(request.agent_ids, &request.coordination_type, parameters)
        .await?;
    Ok(Json(json!({
        "coordination_type": request.coordination_type,
        "result": result.to_json(),
    })))
}

/// `POST /api/v1/orchestration/pipelines`
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(request): Json<PipelineRequest>,
) -> Result<Response, HttpError> {
    state
        .orchestrator
        .setup_pipeline(request.agent_ids, &request.name)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "pipeline": request.name, "status": "registered" })),
    )
        .into_response())
}

/// `POST /api/v1/orchestration/pipelines/{name}/execute`
pub async fn execute_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, HttpError> {
    let input = agent_data_from_value(&request.context)?;
    let result = state.orchestrator.execute_pipeline(&name, input).await?;
    Ok(Json(json!({ "pipeline": name, "result": result.to_json() })))
}

/// `GET /api/v1/orchestration/metrics`
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.orchestrator.orchestration_metrics()))
}

/// `GET /api/v1/orchestration/status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": state.orchestrator.status() }))
}

/// `POST /api/v1/orchestration/select-agent`
pub async fn select_agent(
    State(state): State<AppState>,
    Json(request): Json<SelectAgentRequest>,
) -> Result<Json<Value>, HttpError> {
    let context = agent_data_from_value(&request.context)?;
    let agent_id = state
        .orchestrator
        .select_optimal_agent(&request.capability, &context)
        .ok_or_else(|| {
            HttpError::NotFound(format!(
                "no agent with capability '{}'",
                request.capability
            ))
        })?;
    Ok(Json(json!({ "agent_id": agent_id, "capability": request.capability })))
}

/// `POST /api/v1/orchestration/distribute-workload`
pub async fn distribute_workload(
    State(state): State<AppState>,
    Json(request): Json<DistributeWorkloadRequest>,
) -> Result<Json<Value>, HttpError> {
    let tasks = request
        .tasks
        .iter()
        .map(agent_data_from_value)
        .collect::<Result<Vec<_>, _>>()?;
    let dispatched = state
        .orchestrator
        .distribute_workload(&request.task_type, tasks)?;
    Ok(Json(json!({
        "task_type": request.task_type,
        "dispatched": dispatched,
    })))
}

/// `POST /api/v1/orchestration/optimize`
pub async fn optimize(State(state): State<AppState>) -> Json<Value> {
    state.orchestrator.optimize_allocation();
    Json(json!({ "status": "ok" }))
}
