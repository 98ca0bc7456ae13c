//! Composition root: construct and wire every subsystem.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use inferd_agent::{
    AgentManager, AgentOrchestrator, FunctionContext, SequentialWorkflowExecutor,
};
use inferd_core::config::SystemConfig;
use inferd_core::error::CoreError;
use inferd_core::ports::{CompletionBackend, EngineDeployer, EngineLoader};
use inferd_download::DownloadManager;
use inferd_engine::stub::StubEngineLoader;
use inferd_engine::{CompletionMonitor, NodeManager};

use crate::setup::AutoSetupManager;
use crate::state::AppContext;

/// Server assembly options.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub models_dir: PathBuf,
    pub idle_timeout: Duration,
    pub system: SystemConfig,
    /// Run the auto-setup bootstrap (default engine + agent index) at boot.
    pub run_auto_setup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            models_dir: PathBuf::from("./models"),
            idle_timeout: Duration::from_secs(300),
            system: SystemConfig::default(),
            run_auto_setup: true,
        }
    }
}

/// Build the full application context.
///
/// The engine loader is the in-process stub backend; swapping in a real
/// kernel means passing a different [`EngineLoader`] to [`bootstrap_with_loader`].
pub async fn bootstrap(config: ServerConfig) -> Result<Arc<AppContext>, CoreError> {
    bootstrap_with_loader(config, Arc::new(StubEngineLoader::new())).await
}

/// Build the application context around a caller-supplied engine loader.
pub async fn bootstrap_with_loader(
    config: ServerConfig,
    loader: Arc<dyn EngineLoader>,
) -> Result<Arc<AppContext>, CoreError> {
    std::fs::create_dir_all(&config.models_dir).map_err(|e| {
        CoreError::Internal(format!(
            "cannot create models directory {}: {e}",
            config.models_dir.display()
        ))
    })?;

    let downloads = Arc::new(DownloadManager::new(config.models_dir.clone()));
    let node_manager = Arc::new(NodeManager::new(
        loader,
        Arc::clone(&downloads),
        config.idle_timeout,
    ));
    node_manager.start();

    // Downloads deploy engines through the registry; weak-held to break the
    // ownership cycle.
    let deployer: Arc<dyn EngineDeployer> = Arc::clone(&node_manager) as Arc<dyn EngineDeployer>;
    downloads.set_engine_deployer(&deployer);

    let backend: Arc<dyn CompletionBackend> =
        Arc::clone(&node_manager) as Arc<dyn CompletionBackend>;
    let agents = Arc::new(AgentManager::new(FunctionContext {
        backend: Some(backend),
    }));
    agents.load_configuration(config.system);
    agents.start();

    let sequential = Arc::new(SequentialWorkflowExecutor::new(Arc::clone(&agents)));
    let orchestrator = Arc::new(AgentOrchestrator::new(Arc::clone(&agents)));
    orchestrator.start();

    let auto_setup = Arc::new(AutoSetupManager::new(
        Arc::clone(&node_manager),
        Arc::clone(&downloads),
        Arc::clone(&agents),
    ));
    if config.run_auto_setup {
        auto_setup.perform_auto_setup().await;
    } else {
        auto_setup.refresh_agent_cache();
    }

    let monitor = Arc::new(CompletionMonitor::new());

    Ok(Arc::new(AppContext {
        node_manager,
        downloads,
        monitor,
        agents,
        sequential,
        orchestrator,
        auto_setup,
        started_at: Instant::now(),
    }))
}
