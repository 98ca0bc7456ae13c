//! Core domain types and port definitions for inferd.
//!
//! This crate holds the pure data model of the server (the agent data
//! envelope, job and message types, engine parameters, completion metrics,
//! download progress) plus the port traits infrastructure crates implement.
//! It performs no I/O of its own.

pub mod config;
pub mod data;
pub mod download;
pub mod engine;
pub mod error;
pub mod job;
pub mod message;
pub mod metrics;
pub mod ports;

// Re-export commonly used types for convenience
pub use config::{AgentConfig, FunctionConfig, LlmConfig, SystemConfig, SystemSettings};
pub use data::{AgentData, AgentValue, FunctionResult};
pub use download::{DownloadProgress, DownloadStatus, EngineCreationSpec};
pub use engine::{CompletionOutcome, CompletionParameters, EngineStatus, LoadingParameters};
pub use error::{CoreError, DownloadError, EngineError};
pub use job::{Job, JobStatus};
pub use message::AgentMessage;
pub use metrics::{AggregatedMetrics, CompletionMetrics, CompletionRequestMetrics};
pub use ports::{CompletionBackend, EngineDeployer, EngineLoader, InferenceEngine};
