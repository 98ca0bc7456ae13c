//! Deterministic in-process inference backend.
//!
//! The real transformer kernel is an external collaborator. This stand-in
//! honors the [`InferenceEngine`] contract (token pacing, active-job
//! accounting, unload semantics) so the rest of the server can be exercised
//! without a model file worth gigabytes.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use inferd_core::engine::{CompletionOutcome, CompletionParameters, LoadingParameters};
use inferd_core::error::EngineError;
use inferd_core::ports::{EngineLoader, InferenceEngine};

const VOCAB: &[&str] = &[
    "the", "model", "server", "token", "stream", "answer", "context", "prompt",
];

/// Milliseconds of simulated work per generated token.
const TOKEN_PACE_MS: u64 = 1;

/// Deterministic engine: output depends only on the prompt and seed.
pub struct StubEngine {
    model_name: String,
    active_jobs: AtomicUsize,
    unloaded: AtomicBool,
}

impl StubEngine {
    #[must_use]
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            active_jobs: AtomicUsize::new(0),
            unloaded: AtomicBool::new(false),
        }
    }

    fn generate_text(&self, params: &CompletionParameters, token_count: u32) -> String {
        let seed = params.seed.unwrap_or(0) as usize
            + params.prompt.bytes().map(usize::from).sum::<usize>();
        let mut words = Vec::with_capacity(token_count as usize);
        for i in 0..token_count as usize {
            words.push(VOCAB[(seed + i * 7) % VOCAB.len()]);
        }
        format!("[{}] {}", self.model_name, words.join(" "))
    }
}

#[async_trait]
impl InferenceEngine for StubEngine {
    async fn complete(
        &self,
        params: CompletionParameters,
    ) -> Result<CompletionOutcome, EngineError> {
        if self.unloaded.load(Ordering::SeqCst) {
            return Err(EngineError::Inference("engine is unloaded".to_string()));
        }
        if params.prompt.is_empty() {
            return Err(EngineError::Inference("prompt is empty".to_string()));
        }

        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let token_count = params.max_tokens.clamp(1, 64);
        tokio::time::sleep(Duration::from_millis(TOKEN_PACE_MS)).await;
        let ttft_ms = started.elapsed().as_secs_f64() * 1000.0;
        tokio::time::sleep(Duration::from_millis(TOKEN_PACE_MS * u64::from(token_count))).await;

        let text = self.generate_text(&params, token_count);
        let elapsed_s = started.elapsed().as_secs_f64();
        let tps = if elapsed_s > 0.0 {
            f64::from(token_count) / elapsed_s
        } else {
            0.0
        };

        self.active_jobs.fetch_sub(1, Ordering::SeqCst);
        Ok(CompletionOutcome {
            text,
            tokens_generated: token_count,
            tps,
            ttft_ms,
        })
    }

    fn has_active_jobs(&self) -> bool {
        self.active_jobs.load(Ordering::SeqCst) > 0
    }

    async fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }
}

/// Loader producing [`StubEngine`]s. The model file must exist, mirroring a
/// real loader's failure mode for vanished paths.
pub struct StubEngineLoader {
    loads: AtomicUsize,
    busy: AtomicBool,
}

impl StubEngineLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
        }
    }

    /// How many successful loads this loader has performed.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Force every produced engine to report active jobs. Test hook for
    /// autoscaler skip behavior.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl Default for StubEngineLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineLoader for StubEngineLoader {
    async fn load(
        &self,
        model_path: &Path,
        _params: &LoadingParameters,
        _gpu_id: i32,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::LoadFailed(format!(
                "model file missing: {}",
                model_path.display()
            )));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);

        let name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        let engine = StubEngine::new(name);
        if self.busy.load(Ordering::SeqCst) {
            engine.active_jobs.store(1, Ordering::SeqCst);
        }
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_is_deterministic_for_same_prompt_and_seed() {
        let engine = StubEngine::new("m");
        let params = CompletionParameters {
            prompt: "hello".to_string(),
            max_tokens: 8,
            seed: Some(3),
            ..CompletionParameters::default()
        };

        let a = engine.complete(params.clone()).await.unwrap();
        let b = engine.complete(params).await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.tokens_generated, 8);
        assert!(a.tps > 0.0);
        assert!(a.ttft_ms > 0.0);
    }

    #[tokio::test]
    async fn empty_prompt_and_unloaded_engine_error() {
        let engine = StubEngine::new("m");
        assert!(engine
            .complete(CompletionParameters::default())
            .await
            .is_err());

        engine.unload().await;
        let params = CompletionParameters {
            prompt: "hi".to_string(),
            ..CompletionParameters::default()
        };
        assert!(engine.complete(params).await.is_err());
    }

    #[tokio::test]
    async fn loader_fails_on_missing_path() {
        let loader = StubEngineLoader::new();
        let err = match loader
            .load(Path::new("/no/such/model.gguf"), &LoadingParameters::default(), 0)
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected load to fail"),
        };
        assert!(matches!(err, EngineError::LoadFailed(_)));
        assert_eq!(loader.load_count(), 0);
    }
}
