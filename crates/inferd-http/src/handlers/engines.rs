//! Engine registry endpoints and download progress.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use inferd_core::error::CoreError;

use crate::dto::CreateEngineRequest;
use crate::error::HttpError;
use crate::state::AppState;

/// `GET /v1/models`
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let mut models = Vec::new();
    for engine_id in state.node_manager.list_engine_ids().await {
        let status = state.node_manager.engine_status(&engine_id).await;
        models.push(json!({
            "id": engine_id,
            "object": "model",
            "status": status.map(|s| s.as_str()),
        }));
    }
    Json(json!({ "models": models }))
}

/// `POST /v1/engines`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateEngineRequest>,
) -> Result<Response, HttpError> {
    if request.engine_id.is_empty() {
        return Err(HttpError::BadRequest("engine_id is required".to_string()));
    }
    if request.model_path.is_empty() {
        return Err(HttpError::BadRequest("model_path is required".to_string()));
    }
    if state
        .node_manager
        .engine_status(&request.engine_id)
        .await
        .is_some()
    {
        return Err(HttpError::Conflict(format!(
            "engine '{}' already exists",
            request.engine_id
        )));
    }

    let details = json!({
        "engine_id": request.engine_id,
        "model_path": request.model_path,
        "main_gpu_id": request.main_gpu_id,
        "loading_parameters": request.loading_parameters,
    });

    state
        .node_manager
        .validate_model_path(&request.model_path)
        .await
        .map_err(|err| HttpError::model_loading(err.to_string(), details.clone()))?;

    let result = if request.load_immediately {
        state
            .node_manager
            .add_engine(
                &request.engine_id,
                &request.model_path,
                request.loading_parameters.clone(),
                request.main_gpu_id,
            )
            .await
    } else {
        state
            .node_manager
            .register_engine(
                &request.engine_id,
                &request.model_path,
                request.loading_parameters.clone(),
                request.main_gpu_id,
            )
            .await
    };

    match result {
        Ok(()) => {
            let status = if request.load_immediately {
                "loaded"
            } else {
                "registered"
            };
            Ok((
                StatusCode::CREATED,
                Json(json!({ "engine_id": request.engine_id, "status": status })),
            )
                .into_response())
        }
        Err(CoreError::Conflict(message)) => Err(HttpError::Conflict(message)),
        Err(CoreError::ModelLoading(message)) => Err(HttpError::model_loading(message, details)),
        Err(CoreError::Download(err)) => Err(HttpError::model_loading(err.to_string(), details)),
        Err(err) => Err(err.into()),
    }
}

/// `DELETE /v1/engines/{id}`
pub async fn remove(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    state.node_manager.remove_engine(&engine_id).await?;
    Ok(Json(json!({
        "engine_id": engine_id,
        "message": "engine removed",
    })))
}

/// `GET /v1/engines/{id}/status`
pub async fn status(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let status = state
        .node_manager
        .engine_status(&engine_id)
        .await
        .ok_or_else(|| HttpError::NotFound(format!("engine '{engine_id}' not found")))?;
    Ok(Json(json!({
        "engine_id": engine_id,
        "status": status.as_str(),
        "available": true,
    })))
}

/// `GET /download-progress/{model_id}`
pub async fn download_progress(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let progress = state
        .downloads
        .progress(&model_id)
        .await
        .ok_or_else(|| HttpError::NotFound(format!("no download for model '{model_id}'")))?;
    Ok(Json(
        serde_json::to_value(&progress)
            .map_err(|err| HttpError::Internal(err.to_string()))?,
    ))
}
