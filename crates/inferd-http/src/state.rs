//! Shared application state type.

use std::sync::Arc;
use std::time::Instant;

use inferd_agent::{AgentManager, AgentOrchestrator, SequentialWorkflowExecutor};
use inferd_download::DownloadManager;
use inferd_engine::{CompletionMonitor, NodeManager};

use crate::setup::AutoSetupManager;

/// Every service a handler can reach, wired once at bootstrap.
pub struct AppContext {
    pub node_manager: Arc<NodeManager>,
    pub downloads: Arc<DownloadManager>,
    pub monitor: Arc<CompletionMonitor>,
    pub agents: Arc<AgentManager>,
    pub sequential: Arc<SequentialWorkflowExecutor>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub auto_setup: Arc<AutoSetupManager>,
    pub started_at: Instant,
}

impl AppContext {
    /// Clean shutdown: cancel transfers first, then stop every subsystem
    /// with bounded joins.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down server context");
        self.downloads.wait_for_all().await;
        self.orchestrator.stop().await;
        self.agents.stop().await;
        self.node_manager.shutdown().await;
        tracing::info!("Server context shut down");
    }
}

/// Application state shared across all handlers.
pub type AppState = Arc<AppContext>;
