//! Request/response DTOs shared across handlers.

use serde::Deserialize;
use serde_json::{Value, json};

use inferd_core::data::AgentData;
use inferd_core::engine::{CompletionParameters, LoadingParameters};

use crate::error::HttpError;

pub fn default_model() -> String {
    "default".to_string()
}

pub const fn default_true() -> bool {
    true
}

const fn default_step_timeout() -> u64 {
    60
}

const fn default_max_execution_time() -> u64 {
    300
}

const fn default_consensus_threshold() -> f64 {
    0.5
}

const fn default_negotiation_rounds() -> u32 {
    3
}

/// Convert an optional JSON object into an [`AgentData`]; `null` or absent
/// means empty.
pub fn agent_data_from_value(value: &Value) -> Result<AgentData, HttpError> {
    if value.is_null() {
        return Ok(AgentData::new());
    }
    AgentData::from_json(value).map_err(|err| HttpError::BadRequest(err.to_string()))
}

/// One turn of an OpenAI-style conversation.
#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// OpenAI-compatible completion request (chat and text forms).
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Option<Vec<ChatMessage>>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
}

impl CompletionRequest {
    /// Flatten messages (or take the raw prompt) into the engine prompt.
    #[must_use]
    pub fn render_prompt(&self) -> Option<String> {
        if let Some(messages) = &self.messages {
            if messages.is_empty() {
                return None;
            }
            let mut rendered = String::new();
            for message in messages {
                rendered.push_str(&message.role);
                rendered.push_str(": ");
                rendered.push_str(&message.content);
                rendered.push('\n');
            }
            rendered.push_str("assistant:");
            return Some(rendered);
        }
        self.prompt.clone().filter(|p| !p.is_empty())
    }

    #[must_use]
    pub fn completion_parameters(&self, prompt: String) -> CompletionParameters {
        let defaults = CompletionParameters::default();
        CompletionParameters {
            prompt,
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            seed: self.seed,
        }
    }
}

/// Direct pass-through body for `/v1/inference/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    #[serde(default = "default_model")]
    pub engine_id: String,
    #[serde(flatten)]
    pub params: CompletionParameters,
}

/// Body for `POST /v1/engines`.
#[derive(Debug, Deserialize)]
pub struct CreateEngineRequest {
    pub engine_id: String,
    pub model_path: String,
    #[serde(default = "default_true")]
    pub load_immediately: bool,
    #[serde(default)]
    pub main_gpu_id: i32,
    #[serde(default)]
    pub loading_parameters: LoadingParameters,
}

/// Body for `POST /v1/agents`.
#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(rename = "type", default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

fn default_agent_type() -> String {
    "generic".to_string()
}

/// Body for `POST /v1/agents/{id}/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteFunctionRequest {
    pub function: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Body for the chat/generate/respond agent shortcuts.
#[derive(Debug, Deserialize)]
pub struct AgentTextRequest {
    pub message: String,
}

/// Body for `POST /v1/agents/{id}/message`.
#[derive(Debug, Deserialize)]
pub struct AgentMessageRequest {
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_message_type() -> String {
    "greeting".to_string()
}

/// One step of a sequential workflow definition.
#[derive(Debug, Deserialize)]
pub struct SequentialStepDto {
    #[serde(alias = "id")]
    pub step_id: String,
    #[serde(default, alias = "name")]
    pub step_name: String,
    pub agent_id: String,
    #[serde(alias = "function")]
    pub function_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// Sequential workflow definition body.
#[derive(Debug, Deserialize)]
pub struct SequentialWorkflowDto {
    #[serde(alias = "id")]
    pub workflow_id: String,
    #[serde(default, alias = "name")]
    pub workflow_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_seconds: u64,
    #[serde(default)]
    pub global_context: Value,
    pub steps: Vec<SequentialStepDto>,
}

/// One node of a DAG workflow definition.
#[derive(Debug, Deserialize)]
pub struct OrchestratorStepDto {
    #[serde(alias = "id")]
    pub step_id: String,
    pub agent_id: String,
    #[serde(alias = "function")]
    pub function_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parallel_allowed: bool,
}

/// DAG workflow definition body.
#[derive(Debug, Deserialize)]
pub struct OrchestratorWorkflowDto {
    #[serde(alias = "id")]
    pub workflow_id: String,
    #[serde(default, alias = "name")]
    pub workflow_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub global_context: Value,
    pub steps: Vec<OrchestratorStepDto>,
}

/// Collaboration group definition body.
#[derive(Debug, Deserialize)]
pub struct CollaborationGroupDto {
    #[serde(alias = "id")]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    pub pattern: String,
    pub agent_ids: Vec<String>,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_negotiation_rounds")]
    pub max_negotiation_rounds: u32,
}

/// Body for `POST /api/v1/orchestration/coordinate`.
#[derive(Debug, Deserialize)]
pub struct CoordinateRequest {
    pub agent_ids: Vec<String>,
    pub coordination_type: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Body for `POST /api/v1/orchestration/pipelines`.
#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    pub name: String,
    pub agent_ids: Vec<String>,
}

/// Body for `POST /api/v1/orchestration/select-agent`.
#[derive(Debug, Deserialize)]
pub struct SelectAgentRequest {
    pub capability: String,
    #[serde(default)]
    pub context: Value,
}

/// Body for `POST /api/v1/orchestration/distribute-workload`.
#[derive(Debug, Deserialize)]
pub struct DistributeWorkloadRequest {
    pub task_type: String,
    pub tasks: Vec<Value>,
}

/// Execution input wrapper used by both workflow families.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowRequest {
    #[serde(default, alias = "input", alias = "input_context")]
    pub context: Value,
}

/// Serialize a sequential workflow result for the wire.
#[must_use]
pub fn sequential_result_json(
    result: &inferd_agent::SequentialWorkflowResult,
) -> Value {
    let step_results: serde_json::Map<String, Value> = result
        .step_results
        .iter()
        .map(|(id, res)| {
            (
                id.clone(),
                serde_json::to_value(res).unwrap_or(Value::Null),
            )
        })
        .collect();

    json!({
        "workflow_id": result.workflow_id,
        "workflow_name": result.workflow_name,
        "success": result.success,
        "error": result.error_message,
        "executed_steps": result.executed_steps,
        "total_steps": result.total_steps,
        "successful_steps": result.successful_steps,
        "failed_steps": result.failed_steps,
        "step_results": step_results,
        "step_errors": result.step_errors,
        "step_execution_times_ms": result.step_execution_times_ms,
        "initial_context": result.initial_context.to_json(),
        "final_context": result.final_context.to_json(),
        "total_execution_time_ms": result.total_execution_time_ms,
    })
}

/// Serialize a DAG workflow result for the wire.
#[must_use]
pub fn orchestrator_result_json(result: &inferd_agent::WorkflowResult) -> Value {
    let step_results: serde_json::Map<String, Value> = result
        .step_results
        .iter()
        .map(|(id, res)| {
            (
                id.clone(),
                serde_json::to_value(res).unwrap_or(Value::Null),
            )
        })
        .collect();

    json!({
        "workflow_id": result.workflow_id,
        "success": result.success,
        "error": result.error_message,
        "step_results": step_results,
        "total_execution_time_ms": result.total_execution_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prompt_prefers_messages() {
        let request: CompletionRequest = serde_json::from_value(json!({
            "model": "default",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }))
        .unwrap();
        let prompt = request.render_prompt().unwrap();
        assert!(prompt.contains("system: be brief"));
        assert!(prompt.contains("user: hi"));
        assert!(prompt.ends_with("assistant:"));
    }

    #[test]
    fn render_prompt_falls_back_to_prompt_field() {
        let request: CompletionRequest =
            serde_json::from_value(json!({"prompt": "continue this"})).unwrap();
        assert_eq!(request.render_prompt().as_deref(), Some("continue this"));

        let empty: CompletionRequest = serde_json::from_value(json!({})).unwrap();
        assert!(empty.render_prompt().is_none());
    }

    #[test]
    fn step_dto_accepts_aliases() {
        let dto: SequentialStepDto = serde_json::from_value(json!({
            "id": "s1",
            "name": "first",
            "agent_id": "a",
            "function": "echo"
        }))
        .unwrap();
        assert_eq!(dto.step_id, "s1");
        assert_eq!(dto.step_name, "first");
        assert_eq!(dto.function_name, "echo");
        assert_eq!(dto.timeout_seconds, 60);
    }

    #[test]
    fn engine_request_defaults() {
        let request: CreateEngineRequest = serde_json::from_value(json!({
            "engine_id": "e1",
            "model_path": "/m.gguf"
        }))
        .unwrap();
        assert!(request.load_immediately);
        assert_eq!(request.main_gpu_id, 0);
        assert_eq!(request.loading_parameters.n_ctx, 4096);
    }
}
