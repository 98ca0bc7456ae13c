//! First-boot bootstrap: default engine acquisition and the agent
//! name→id index used for workflow auto-mapping.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};

use inferd_agent::AgentManager;
use inferd_core::download::EngineCreationSpec;
use inferd_core::engine::LoadingParameters;
use inferd_download::DownloadManager;
use inferd_engine::NodeManager;

/// One engine the server should ensure exists at boot.
#[derive(Debug, Clone)]
pub struct EngineSetupConfig {
    pub engine_id: String,
    pub model_path: String,
    pub download_url: String,
    pub load_params: LoadingParameters,
    pub gpu_id: i32,
}

impl EngineSetupConfig {
    fn default_engine() -> Self {
        Self {
            engine_id: "default".to_string(),
            model_path: "./models/Qwen2.5-0.5B-Instruct.Q4_K_M.gguf".to_string(),
            download_url:
                "https://huggingface.co/QuantFactory/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/Qwen2.5-0.5B-Instruct.Q4_K_M.gguf"
                    .to_string(),
            load_params: LoadingParameters::default(),
            gpu_id: 0,
        }
    }
}

/// A 36-character dashed UUID shape; anything else is treated as an agent
/// name subject to mapping.
fn looks_like_uuid(value: &str) -> bool {
    value.len() == 36
        && value
            .char_indices()
            .all(|(i, c)| match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            })
}

/// Boot-time setup: ensure a default engine exists (downloading if needed)
/// and maintain the agent name↔id index.
pub struct AutoSetupManager {
    node_manager: Arc<NodeManager>,
    downloads: Arc<DownloadManager>,
    agents: Arc<AgentManager>,
    engine_configs: Mutex<Vec<EngineSetupConfig>>,
    name_index: Mutex<HashMap<String, String>>,
    agents_cached: AtomicBool,
    default_engine_ready: AtomicBool,
    auto_download: AtomicBool,
}

impl AutoSetupManager {
    #[must_use]
    pub fn new(
        node_manager: Arc<NodeManager>,
        downloads: Arc<DownloadManager>,
        agents: Arc<AgentManager>,
    ) -> Self {
        tracing::info!("AutoSetupManager initialized");
        Self {
            node_manager,
            downloads,
            agents,
            engine_configs: Mutex::new(vec![EngineSetupConfig::default_engine()]),
            name_index: Mutex::new(HashMap::new()),
            agents_cached: AtomicBool::new(false),
            default_engine_ready: AtomicBool::new(false),
            auto_download: AtomicBool::new(true),
        }
    }

    pub fn add_engine_config(&self, config: EngineSetupConfig) {
        self.engine_configs
            .lock()
            .expect("engine configs lock poisoned")
            .push(config);
    }

    pub fn set_auto_download(&self, enabled: bool) {
        self.auto_download.store(enabled, Ordering::SeqCst);
    }

    /// Run the full bootstrap: engines, then the agent index.
    pub async fn perform_auto_setup(&self) -> bool {
        tracing::info!("Starting automatic server setup");

        let engines_ok = self.auto_setup_engines().await;
        if !engines_ok {
            tracing::warn!("Engine auto-setup failed, continuing");
        }
        let agents_ok = self.auto_discover_agents();
        if !agents_ok {
            tracing::warn!("Agent auto-discovery failed, continuing");
        }

        let ready = self.is_default_engine_ready().await;
        tracing::info!(
            default_engine_ready = ready,
            agents = self.available_agent_names().len(),
            "Auto-setup completed"
        );
        engines_ok && agents_ok
    }

    async fn auto_setup_engines(&self) -> bool {
        if self.ensure_default_engine_exists().await {
            tracing::info!("Default engine already exists");
            self.default_engine_ready.store(true, Ordering::SeqCst);
            return true;
        }

        let configs = self
            .engine_configs
            .lock()
            .expect("engine configs lock poisoned")
            .clone();
        let mut any_success = false;
        for config in configs {
            tracing::info!(engine_id = %config.engine_id, "Attempting to setup engine");
            if self.create_engine_from_config(&config).await {
                if config.engine_id == "default" {
                    self.default_engine_ready.store(true, Ordering::SeqCst);
                }
                any_success = true;
            } else {
                tracing::warn!(engine_id = %config.engine_id, "Failed to setup engine");
            }
        }
        any_success
    }

    async fn ensure_default_engine_exists(&self) -> bool {
        if self.node_manager.engine_status("default").await.is_some() {
            return true;
        }
        // Any existing engine can stand in for the default.
        let existing = self.node_manager.list_engine_ids().await;
        if let Some(first) = existing.first() {
            tracing::info!(engine_id = %first, "Found existing engine, treating as default");
            return true;
        }
        false
    }

    async fn create_engine_from_config(&self, config: &EngineSetupConfig) -> bool {
        let spec = EngineCreationSpec {
            engine_id: config.engine_id.clone(),
            load_params: config.load_params.clone(),
            gpu_id: config.gpu_id,
            load_immediately: true,
        };

        // A valid local copy loads directly; otherwise fall back to the
        // download URL.
        if Path::new(&config.model_path).exists() {
            match self
                .node_manager
                .add_engine(
                    &config.engine_id,
                    &config.model_path,
                    config.load_params.clone(),
                    config.gpu_id,
                )
                .await
            {
                Ok(()) => return true,
                Err(err) => {
                    tracing::warn!(
                        engine_id = %config.engine_id,
                        error = %err,
                        "Local model rejected, falling back to download"
                    );
                }
            }
        }

        if !self.auto_download.load(Ordering::SeqCst) || config.download_url.is_empty() {
            tracing::warn!(
                engine_id = %config.engine_id,
                "Auto-download disabled or no URL provided"
            );
            return false;
        }

        tracing::info!(engine_id = %config.engine_id, url = %config.download_url, "Downloading model");
        match self
            .downloads
            .load_model_at_startup(&config.engine_id, &config.download_url, spec)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(engine_id = %config.engine_id, error = %err, "Model download failed");
                false
            }
        }
    }

    /// Rebuild the name→id index from the agent manager.
    pub fn refresh_agent_cache(&self) {
        let mut index = HashMap::new();
        for agent_id in self.agents.list_agents() {
            if let Some(agent) = self.agents.get_agent(&agent_id) {
                if !agent.name().is_empty() {
                    index.insert(agent.name().to_string(), agent_id);
                }
            }
        }
        *self.name_index.lock().expect("name index lock poisoned") = index;
        self.agents_cached.store(true, Ordering::SeqCst);
    }

    fn auto_discover_agents(&self) -> bool {
        self.refresh_agent_cache();
        let index = self.name_index.lock().expect("name index lock poisoned");
        if index.is_empty() {
            tracing::warn!("No agents discovered");
            return false;
        }
        tracing::info!(count = index.len(), "Discovered agents");
        true
    }

    fn ensure_cache(&self) {
        if !self.agents_cached.load(Ordering::SeqCst) {
            self.refresh_agent_cache();
        }
    }

    #[must_use]
    pub fn agent_mappings(&self) -> HashMap<String, String> {
        self.ensure_cache();
        self.name_index
            .lock()
            .expect("name index lock poisoned")
            .clone()
    }

    #[must_use]
    pub fn available_agent_names(&self) -> Vec<String> {
        self.ensure_cache();
        let mut names: Vec<String> = self
            .name_index
            .lock()
            .expect("name index lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub async fn is_default_engine_ready(&self) -> bool {
        if self.default_engine_ready.load(Ordering::SeqCst) {
            return true;
        }
        if self.node_manager.engine_status("default").await.is_some() {
            self.default_engine_ready.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Rewrite every step `agent_id` that does not look like a UUID using
    /// the name index. Returns `None` when any name cannot be resolved.
    #[must_use]
    pub fn map_agent_names_in_workflow(&self, workflow: &Value) -> Option<Value> {
        self.ensure_cache();
        let index = self
            .name_index
            .lock()
            .expect("name index lock poisoned")
            .clone();

        let mut mapped = workflow.clone();
        if let Some(steps) = mapped.get_mut("steps").and_then(Value::as_array_mut) {
            for step in steps {
                let Some(agent_id) = step.get("agent_id").and_then(Value::as_str) else {
                    continue;
                };
                if looks_like_uuid(agent_id) {
                    continue;
                }
                match index.get(agent_id) {
                    Some(uuid) => {
                        tracing::debug!(name = agent_id, uuid = %uuid, "Mapped agent name in workflow step");
                        step["agent_id"] = Value::String(uuid.clone());
                    }
                    None => {
                        tracing::warn!(name = agent_id, "Agent not found in mapping");
                        return None;
                    }
                }
            }
        }
        Some(mapped)
    }

    /// Structural workflow validation with mapping applied; mirrors the
    /// auto-setup HTTP surface.
    #[must_use]
    pub fn validate_workflow(&self, workflow: &Value) -> Value {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        if !workflow.is_object() {
            issues.push("workflow must be a JSON object".to_string());
        }
        let steps = workflow.get("steps").and_then(Value::as_array);
        match steps {
            None => issues.push("workflow has no steps array".to_string()),
            Some(steps) if steps.is_empty() => issues.push("workflow has no steps".to_string()),
            Some(steps) => {
                for (index, step) in steps.iter().enumerate() {
                    if step.get("agent_id").and_then(Value::as_str).is_none() {
                        issues.push(format!("step {index} is missing agent_id"));
                    }
                    if step
                        .get("function_name")
                        .or_else(|| step.get("function"))
                        .and_then(Value::as_str)
                        .is_none()
                    {
                        issues.push(format!("step {index} is missing function_name"));
                    }
                }
            }
        }

        let mapped = self.map_agent_names_in_workflow(workflow);
        if mapped.is_none() {
            issues.push("workflow references unknown agent names".to_string());
            suggestions.push(format!(
                "available agents: {}",
                self.available_agent_names().join(", ")
            ));
        }

        json!({
            "valid": issues.is_empty(),
            "issues": issues,
            "suggestions": suggestions,
            "mapped_workflow": mapped.unwrap_or(Value::Null),
        })
    }

    /// Status report for the auto-setup endpoints.
    pub async fn status_json(&self) -> Value {
        let engine_ids = self.node_manager.list_engine_ids().await;
        let mappings = self.agent_mappings();
        json!({
            "auto_setup_enabled": true,
            "default_engine_ready": self.is_default_engine_ready().await,
            "agents_available": !mappings.is_empty(),
            "agent_count": mappings.len(),
            "auto_download_enabled": self.auto_download.load(Ordering::SeqCst),
            "engines": engine_ids,
            "engine_count": engine_ids.len(),
            "agent_mappings": mappings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_shape_detection() {
        assert!(looks_like_uuid("123e4567-e89b-42d3-a456-426614174000"));
        assert!(!looks_like_uuid("analyzer"));
        assert!(!looks_like_uuid("123e4567e89b42d3a456426614174000"));
        assert!(!looks_like_uuid("123e4567-e89b-42d3-a456-42661417400g"));
    }
}
