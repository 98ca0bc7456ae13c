//! Engine parameter and result types.

use serde::{Deserialize, Serialize};

/// Parameters applied when loading a model into an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingParameters {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_gpu_layers: u32,
    pub n_parallel: u32,
    pub n_keep: u32,
    pub use_mlock: bool,
    pub use_mmap: bool,
    pub cont_batching: bool,
    pub warmup: bool,
}

impl Default for LoadingParameters {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_batch: 512,
            n_ubatch: 512,
            n_gpu_layers: 0,
            n_parallel: 1,
            n_keep: 0,
            use_mlock: false,
            use_mmap: true,
            cont_batching: false,
            warmup: true,
        }
    }
}

/// Parameters for a single completion request against an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionParameters {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for CompletionParameters {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
            seed: None,
        }
    }
}

/// Result of a completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub text: String,
    pub tokens_generated: u32,
    /// Tokens per second over the request turnaround.
    pub tps: f64,
    /// Time to first token in milliseconds.
    pub ttft_ms: f64,
}

/// Load state of a registered engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Loaded,
    Unloaded,
}

impl EngineStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Unloaded => "unloaded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_parameters_defaults_match_auto_setup() {
        let params = LoadingParameters::default();
        assert_eq!(params.n_ctx, 4096);
        assert_eq!(params.n_batch, 512);
        assert_eq!(params.n_parallel, 1);
        assert!(params.use_mmap);
        assert!(!params.use_mlock);
        assert!(params.warmup);
    }

    #[test]
    fn completion_parameters_deserialize_with_partial_body() {
        let params: CompletionParameters =
            serde_json::from_str(r#"{"prompt": "hi", "max_tokens": 16}"#).unwrap();
        assert_eq!(params.prompt, "hi");
        assert_eq!(params.max_tokens, 16);
        assert!((params.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(params.seed, None);
    }
}
