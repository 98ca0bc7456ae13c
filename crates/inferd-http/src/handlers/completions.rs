//! OpenAI-compatible completion endpoints.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use inferd_core::engine::CompletionOutcome;
use inferd_core::ports::CompletionBackend;

use crate::dto::{CompletionRequest, InferenceRequest};
use crate::error::HttpError;
use crate::sse::{data_frame, done_frame, sse_response};
use crate::state::AppState;

/// `POST /v1/chat/completions`
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, HttpError> {
    run_completion(&state, request, CompletionKind::Chat).await
}

/// `POST /v1/completions`
pub async fn text(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, HttpError> {
    run_completion(&state, request, CompletionKind::Text).await
}

#[derive(Clone, Copy)]
enum CompletionKind {
    Chat,
    Text,
}

async fn run_completion(
    state: &AppState,
    request: CompletionRequest,
    kind: CompletionKind,
) -> Result<Response, HttpError> {
    let prompt = request
        .render_prompt()
        .ok_or_else(|| HttpError::BadRequest("messages or prompt is required".to_string()))?;

    let prompt_tokens = prompt.split_whitespace().count() as u64;
    let request_id = state.monitor.start_request(&request.model, &request.model);
    state.monitor.record_input_tokens(&request_id, prompt_tokens);

    let params = request.completion_parameters(prompt);
    let outcome = match state.node_manager.completion(&request.model, params).await {
        Ok(outcome) => outcome,
        Err(err) => {
            state.monitor.fail_request(&request_id);
            return Err(err.into());
        }
    };

    state.monitor.record_first_token(&request_id);
    for _ in 0..outcome.tokens_generated {
        state.monitor.record_output_token(&request_id);
    }
    state.monitor.complete_request(&request_id);

    let created = chrono::Utc::now().timestamp();
    if request.stream {
        Ok(stream_response(&request_id, &request.model, &outcome, created, kind))
    } else {
        Ok(Json(full_response(
            &request_id,
            &request.model,
            &outcome,
            prompt_tokens,
            created,
            kind,
        ))
        .into_response())
    }
}

fn usage_json(model_prompt_tokens: u64, outcome: &CompletionOutcome) -> Value {
    json!({
        "prompt_tokens": model_prompt_tokens,
        "completion_tokens": outcome.tokens_generated,
        "total_tokens": model_prompt_tokens + u64::from(outcome.tokens_generated),
    })
}

fn full_response(
    request_id: &str,
    model: &str,
    outcome: &CompletionOutcome,
    prompt_tokens: u64,
    created: i64,
    kind: CompletionKind,
) -> Value {
    match kind {
        CompletionKind::Chat => json!({
            "id": format!("chatcmpl-{request_id}"),
            "object": "chat.completion",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": outcome.text},
                "finish_reason": "stop",
            }],
            "usage": usage_json(prompt_tokens, outcome),
        }),
        CompletionKind::Text => json!({
            "id": format!("cmpl-{request_id}"),
            "object": "text_completion",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "text": outcome.text,
                "finish_reason": "stop",
            }],
            "usage": usage_json(prompt_tokens, outcome),
        }),
    }
}

/// Chunk the completed text into SSE frames terminated by `[DONE]`.
fn stream_response(
    request_id: &str,
    model: &str,
    outcome: &CompletionOutcome,
    created: i64,
    kind: CompletionKind,
) -> Response {
    let (id_prefix, object) = match kind {
        CompletionKind::Chat => ("chatcmpl", "chat.completion.chunk"),
        CompletionKind::Text => ("cmpl", "text_completion.chunk"),
    };
    let id = format!("{id_prefix}-{request_id}");

    let words: Vec<&str> = outcome.text.split_inclusive(' ').collect();
    let mut frames = Vec::with_capacity(words.len() + 2);
    for word in words {
        let chunk = match kind {
            CompletionKind::Chat => json!({
                "id": id,
                "object": object,
                "created": created,
                "model": model,
                "choices": [{
                    "index": 0,
                    "delta": {"content": word},
                    "finish_reason": Value::Null,
                }],
            }),
            CompletionKind::Text => json!({
                "id": id,
                "object": object,
                "created": created,
                "model": model,
                "choices": [{
                    "index": 0,
                    "text": word,
                    "finish_reason": Value::Null,
                }],
            }),
        };
        frames.push(data_frame(&chunk));
    }

    let terminal = json!({
        "id": id,
        "object": object,
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {},
            "finish_reason": "stop",
        }],
    });
    frames.push(data_frame(&terminal));
    frames.push(done_frame());

    sse_response(frames)
}

/// `POST /v1/inference/chat/completions`: raw pass-through.
pub async fn inference_passthrough(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<Value>, HttpError> {
    if request.params.prompt.is_empty() {
        return Err(HttpError::BadRequest("prompt is required".to_string()));
    }

    let outcome = state
        .node_manager
        .completion(&request.engine_id, request.params)
        .await?;

    Ok(Json(json!({
        "text": outcome.text,
        "tokens": outcome.tokens_generated,
        "tps": outcome.tps,
        "ttft": outcome.ttft_ms,
    })))
}
