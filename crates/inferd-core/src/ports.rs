//! Port definitions (trait abstractions) for subsystem boundaries.
//!
//! Ports define what the core consumes from infrastructure without leaking
//! implementation details. The inference kernel is an external collaborator:
//! it appears here only as the [`InferenceEngine`] contract.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::download::EngineCreationSpec;
use crate::engine::{CompletionOutcome, CompletionParameters, LoadingParameters};
use crate::error::{CoreError, EngineError};

/// A loaded model instance capable of answering completion jobs.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run one completion to the end and return the outcome.
    async fn complete(
        &self,
        params: CompletionParameters,
    ) -> Result<CompletionOutcome, EngineError>;

    /// Whether any jobs are currently in flight. The autoscaler refuses to
    /// unload an engine that reports active jobs.
    fn has_active_jobs(&self) -> bool;

    /// Release model resources. Idempotent.
    async fn unload(&self);
}

/// Constructs engine instances from a local model path.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(
        &self,
        model_path: &Path,
        params: &LoadingParameters,
        gpu_id: i32,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError>;
}

/// Engine-addressed completion entry point used by agent functions.
///
/// Keeps the agent substrate decoupled from the engine registry: agents know
/// engine ids, not engines.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn completion(
        &self,
        engine_id: &str,
        params: CompletionParameters,
    ) -> Result<CompletionOutcome, CoreError>;

    async fn has_engine(&self, engine_id: &str) -> bool;
}

/// Deploys an engine from an already-local model file.
///
/// Implemented by the engine registry; invoked by the download manager after
/// a download that carried an [`EngineCreationSpec`] completes.
#[async_trait]
pub trait EngineDeployer: Send + Sync {
    async fn deploy(&self, spec: &EngineCreationSpec, model_path: &Path) -> Result<(), CoreError>;
}
