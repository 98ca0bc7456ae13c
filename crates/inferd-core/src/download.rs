//! Download progress domain types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::LoadingParameters;

/// Lifecycle state of a tracked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
    Cancelled,
    CreatingEngine,
    EngineCreated,
    EngineCreationFailed,
}

impl DownloadStatus {
    /// Terminal states are eligible for retention-window cleanup.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Downloading | Self::CreatingEngine)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::CreatingEngine => "creating_engine",
            Self::EngineCreated => "engine_created",
            Self::EngineCreationFailed => "engine_creation_failed",
        }
    }
}

/// Instructions for deploying an engine once its model finishes downloading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCreationSpec {
    pub engine_id: String,
    #[serde(default)]
    pub load_params: LoadingParameters,
    #[serde(default)]
    pub gpu_id: i32,
    /// `true` loads the engine immediately; `false` registers it for lazy load.
    #[serde(default = "default_true")]
    pub load_immediately: bool,
}

const fn default_true() -> bool {
    true
}

/// Point-in-time snapshot of one download's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub model_id: String,
    pub url: String,
    pub local_path: PathBuf,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percentage: f64,
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl DownloadProgress {
    #[must_use]
    pub fn new(
        model_id: impl Into<String>,
        url: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            url: url.into(),
            local_path: local_path.into(),
            total_bytes: 0,
            downloaded_bytes: 0,
            percentage: 0.0,
            status: DownloadStatus::Downloading,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!DownloadStatus::Downloading.is_terminal());
        assert!(!DownloadStatus::CreatingEngine.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::EngineCreationFailed.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DownloadStatus::CreatingEngine).unwrap();
        assert_eq!(json, "\"creating_engine\"");
    }
}
