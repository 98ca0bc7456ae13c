//! Config-driven agent fleet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use inferd_core::config::{AgentConfig, FunctionConfig, SystemConfig};
use inferd_core::error::CoreError;

use crate::agent::AgentCore;
use crate::functions::{AgentFunction, BuiltinFn, FunctionContext, FunctionEntry};
use crate::router::MessageRouter;

/// Build a function entry from its config, picking the variant by `type`.
/// Returns `None` for an unknown type or unknown builtin name.
#[must_use]
pub fn build_function(config: &FunctionConfig) -> Option<FunctionEntry> {
    let function = match config.function_type.as_str() {
        "builtin" => AgentFunction::Builtin(BuiltinFn::by_name(&config.name)?),
        "llm" => AgentFunction::Llm {
            config: inferd_core::config::LlmConfig::default(),
            system_prompt: format!(
                "You are a helpful AI assistant performing the function: {}",
                config.description
            ),
        },
        "external_api" => AgentFunction::Remote {
            endpoint: config.endpoint.clone(),
        },
        "inference" => AgentFunction::Inference {
            engine_id: if config.implementation.is_empty() {
                "default".to_string()
            } else {
                config.implementation.clone()
            },
        },
        other => {
            tracing::warn!(function = %config.name, function_type = other, "Unknown function type");
            return None;
        }
    };
    Some(FunctionEntry::new(
        &config.name,
        &config.description,
        function,
    ))
}

/// Fleet summary for the status endpoint.
#[derive(Debug, Clone)]
pub struct AgentSystemStatus {
    pub total_agents: usize,
    pub running_agents: usize,
    pub loaded_functions: usize,
    pub worker_threads: u32,
    pub log_level: String,
}

/// Owns every [`AgentCore`] and the shared message router. Back-references
/// from the router to agents are id-keyed delivery closures, never owning
/// links.
pub struct AgentManager {
    agents: RwLock<HashMap<String, Arc<AgentCore>>>,
    router: Arc<MessageRouter>,
    config: Mutex<SystemConfig>,
    context: FunctionContext,
    running: AtomicBool,
}

impl AgentManager {
    #[must_use]
    pub fn new(context: FunctionContext) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            router: Arc::new(MessageRouter::new()),
            config: Mutex::new(SystemConfig::default()),
            context,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Install a configuration without instantiating agents yet.
    pub fn load_configuration(&self, config: SystemConfig) {
        tracing::info!(
            agents = config.agents.len(),
            functions = config.functions.len(),
            "Configuration loaded"
        );
        *self.config.lock().expect("config lock poisoned") = config;
    }

    /// Start the router and build the configured fleet, auto-starting agents
    /// that request it.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Agent manager is already running");
            return;
        }
        self.router.start();

        let agent_configs = {
            let config = self.config.lock().expect("config lock poisoned");
            config.agents.clone()
        };
        for agent_config in agent_configs {
            match self.create_agent(&agent_config) {
                Ok(agent_id) => {
                    if agent_config.auto_start {
                        let _ = self.start_agent(&agent_id);
                    }
                }
                Err(err) => {
                    tracing::error!(agent = %agent_config.name, error = %err, "Failed to create agent from config");
                }
            }
        }
        tracing::info!("Agent manager started");
    }

    /// Stop all agents and the router.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping agent manager");

        let agents: Vec<Arc<AgentCore>> = {
            let agents = self.agents.read().expect("agents lock poisoned");
            agents.values().cloned().collect()
        };
        for agent in agents {
            if agent.is_running() {
                agent.stop().await;
            }
        }
        self.router.stop().await;
        tracing::info!("Agent manager stopped");
    }

    /// Create an agent from config and register it. Returns the agent id.
    pub fn create_agent(self: &Arc<Self>, config: &AgentConfig) -> Result<String, CoreError> {
        if config.name.is_empty() || config.agent_type.is_empty() {
            return Err(CoreError::Validation(
                "agent configuration requires name and type".to_string(),
            ));
        }

        let agent = AgentCore::new(&config.name, &config.agent_type, self.context.clone());
        for capability in &config.capabilities {
            agent.add_capability(capability);
        }

        // Resolve the agent's function list against the function catalogue.
        {
            let system_config = self.config.lock().expect("config lock poisoned");
            for function_name in &config.functions {
                let entry = system_config
                    .function(function_name)
                    .and_then(build_function);
                match entry {
                    Some(entry) => agent.registry().register(entry),
                    None => tracing::warn!(
                        agent = %config.name,
                        function = %function_name,
                        "Failed to create function for agent"
                    ),
                }
            }
        }

        agent.set_message_router(&self.router);

        let agent_id = agent.id().to_string();
        self.agents
            .write()
            .expect("agents lock poisoned")
            .insert(agent_id.clone(), agent);

        tracing::info!(agent = %config.name, id = %&agent_id[..8], "Created agent from config");
        Ok(agent_id)
    }

    pub fn start_agent(&self, agent_id: &str) -> Result<(), CoreError> {
        let agent = self
            .get_agent(agent_id)
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;
        if agent.is_running() {
            tracing::warn!(agent_id, "Agent is already running");
            return Ok(());
        }
        agent.start();
        Ok(())
    }

    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), CoreError> {
        let agent = self
            .get_agent(agent_id)
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;
        if agent.is_running() {
            agent.stop().await;
        }
        Ok(())
    }

    /// Stop (if needed) and remove an agent, unregistering its mailbox.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), CoreError> {
        let agent = {
            let mut agents = self.agents.write().expect("agents lock poisoned");
            agents
                .remove(agent_id)
                .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?
        };
        if agent.is_running() {
            agent.stop().await;
        }
        self.router.unregister_handler(agent_id);
        tracing::info!(agent_id, "Agent deleted");
        Ok(())
    }

    #[must_use]
    pub fn list_agents(&self) -> Vec<String> {
        self.agents
            .read()
            .expect("agents lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<AgentCore>> {
        self.agents
            .read()
            .expect("agents lock poisoned")
            .get(agent_id)
            .cloned()
    }

    /// Name→agent lookup; names are not required to be unique, first match
    /// wins.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AgentCore>> {
        self.agents
            .read()
            .expect("agents lock poisoned")
            .values()
            .find(|agent| agent.name() == name)
            .cloned()
    }

    /// Stop everything, clear the registry, and rebuild from a new config.
    pub async fn reload(self: &Arc<Self>, config: SystemConfig) -> Result<(), CoreError> {
        tracing::info!("Reloading configuration");

        let agents: Vec<(String, Arc<AgentCore>)> = {
            let mut map = self.agents.write().expect("agents lock poisoned");
            map.drain().collect()
        };
        for (agent_id, agent) in agents {
            if agent.is_running() {
                agent.stop().await;
            }
            self.router.unregister_handler(&agent_id);
        }

        self.load_configuration(config);

        let agent_configs = {
            let config = self.config.lock().expect("config lock poisoned");
            config.agents.clone()
        };
        for agent_config in agent_configs {
            let agent_id = self.create_agent(&agent_config)?;
            if agent_config.auto_start {
                self.start_agent(&agent_id)?;
            }
        }
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    #[must_use]
    pub fn system_status(&self) -> AgentSystemStatus {
        let agents = self.agents.read().expect("agents lock poisoned");
        let running_agents = agents.values().filter(|a| a.is_running()).count();
        let config = self.config.lock().expect("config lock poisoned");
        AgentSystemStatus {
            total_agents: agents.len(),
            running_agents,
            loaded_functions: config.functions.len(),
            worker_threads: config.system.worker_threads,
            log_level: config.system.log_level.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inferd_core::config::SystemSettings;

    fn sample_config() -> SystemConfig {
        SystemConfig {
            system: SystemSettings::default(),
            agents: vec![
                AgentConfig {
                    name: "analyzer".to_string(),
                    agent_type: "worker".to_string(),
                    capabilities: vec!["text_processing".to_string()],
                    functions: vec!["summarize".to_string()],
                    auto_start: true,
                    ..AgentConfig::default()
                },
                AgentConfig {
                    name: "idle".to_string(),
                    agent_type: "worker".to_string(),
                    auto_start: false,
                    ..AgentConfig::default()
                },
            ],
            functions: vec![FunctionConfig {
                name: "summarize".to_string(),
                function_type: "llm".to_string(),
                description: "Summarize text".to_string(),
                ..FunctionConfig::default()
            }],
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_builds_fleet_and_honors_auto_start() {
        let manager = Arc::new(AgentManager::new(FunctionContext::default()));
        manager.load_configuration(sample_config());
        manager.start();

        assert_eq!(manager.list_agents().len(), 2);
        let analyzer = manager.find_by_name("analyzer").unwrap();
        assert!(analyzer.is_running());
        assert!(analyzer.has_capability("text_processing"));
        assert!(analyzer.registry().contains("summarize"));

        let idle = manager.find_by_name("idle").unwrap();
        assert!(!idle.is_running());

        let status = manager.system_status();
        assert_eq!(status.total_agents, 2);
        assert_eq!(status.running_agents, 1);
        assert_eq!(status.loaded_functions, 1);

        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lifecycle_operations_validate_ids() {
        let manager = Arc::new(AgentManager::new(FunctionContext::default()));
        manager.load_configuration(sample_config());
        manager.start();

        assert!(matches!(
            manager.start_agent("missing"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_agent("missing").await,
            Err(CoreError::NotFound(_))
        ));

        let idle_id = manager.find_by_name("idle").unwrap().id().to_string();
        manager.start_agent(&idle_id).unwrap();
        assert!(manager.get_agent(&idle_id).unwrap().is_running());
        manager.stop_agent(&idle_id).await.unwrap();
        assert!(!manager.get_agent(&idle_id).unwrap().is_running());

        manager.delete_agent(&idle_id).await.unwrap();
        assert!(manager.get_agent(&idle_id).is_none());

        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_replaces_the_fleet() {
        let manager = Arc::new(AgentManager::new(FunctionContext::default()));
        manager.load_configuration(sample_config());
        manager.start();
        let old_ids = manager.list_agents();

        let mut new_config = sample_config();
        new_config.agents.truncate(1);
        manager.reload(new_config).await.unwrap();

        let new_ids = manager.list_agents();
        assert_eq!(new_ids.len(), 1);
        assert!(new_ids.iter().all(|id| !old_ids.contains(id)));

        manager.stop().await;
    }

    #[test]
    fn create_agent_requires_name_and_type() {
        let manager = Arc::new(AgentManager::new(FunctionContext::default()));
        let err = manager.create_agent(&AgentConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn factory_maps_types_to_variants() {
        let llm = FunctionConfig {
            name: "gen".to_string(),
            function_type: "llm".to_string(),
            ..FunctionConfig::default()
        };
        assert!(matches!(
            build_function(&llm).unwrap().function,
            AgentFunction::Llm { .. }
        ));

        let api = FunctionConfig {
            name: "fetch".to_string(),
            function_type: "external_api".to_string(),
            endpoint: "https://api.example".to_string(),
            ..FunctionConfig::default()
        };
        assert!(matches!(
            build_function(&api).unwrap().function,
            AgentFunction::Remote { .. }
        ));

        let builtin = FunctionConfig {
            name: "echo".to_string(),
            function_type: "builtin".to_string(),
            ..FunctionConfig::default()
        };
        assert!(matches!(
            build_function(&builtin).unwrap().function,
            AgentFunction::Builtin(BuiltinFn::Echo)
        ));

        let unknown_builtin = FunctionConfig {
            name: "mystery".to_string(),
            function_type: "builtin".to_string(),
            ..FunctionConfig::default()
        };
        assert!(build_function(&unknown_builtin).is_none());

        let unknown_type = FunctionConfig {
            name: "x".to_string(),
            function_type: "quantum".to_string(),
            ..FunctionConfig::default()
        };
        assert!(build_function(&unknown_type).is_none());
    }
}
