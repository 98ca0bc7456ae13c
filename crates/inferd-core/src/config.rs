//! Declarative system configuration.
//!
//! Loaded from YAML at boot; describes the agent fleet, the function
//! catalogue, and global runtime settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::AgentData;
use crate::error::CoreError;

/// Top-level config file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub system: SystemSettings,
    pub agents: Vec<AgentConfig>,
    pub functions: Vec<FunctionConfig>,
}

impl SystemConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("invalid config: {e}")))
    }

    /// Look up a function config by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionConfig> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Global runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub worker_threads: u32,
    pub log_level: String,
    pub health_check_interval_seconds: u64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            log_level: "info".to_string(),
            health_check_interval_seconds: 30,
        }
    }
}

/// One agent in the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub role: String,
    pub system_prompt: String,
    pub capabilities: Vec<String>,
    pub functions: Vec<String>,
    pub llm: LlmConfig,
    pub auto_start: bool,
}

/// LLM settings attached to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model_name: String,
    pub api_endpoint: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "default".to_string(),
            api_endpoint: String::new(),
            temperature: 0.7,
            max_tokens: 256,
            stop_sequences: Vec::new(),
        }
    }
}

/// One entry of the function catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    pub name: String,
    /// One of `builtin`, `llm`, `external_api`, `inference`.
    #[serde(rename = "type")]
    pub function_type: String,
    pub description: String,
    pub parameters: AgentData,
    pub endpoint: String,
    pub implementation: String,
    pub async_capable: bool,
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
system:
  worker_threads: 8
  log_level: debug
agents:
  - name: analyzer
    type: worker
    role: "text analysis"
    capabilities: [text_processing]
    functions: [text_analysis, echo]
    auto_start: true
    llm:
      model_name: default
      temperature: 0.2
functions:
  - name: text_analysis
    type: builtin
    description: "Analyze text"
  - name: summarize
    type: llm
    description: "Summarize text"
"#;

    #[test]
    fn parses_sample_yaml() {
        let config = SystemConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.system.worker_threads, 8);
        assert_eq!(config.system.log_level, "debug");
        // Omitted field takes its default
        assert_eq!(config.system.health_check_interval_seconds, 30);

        assert_eq!(config.agents.len(), 1);
        let agent = &config.agents[0];
        assert_eq!(agent.name, "analyzer");
        assert_eq!(agent.agent_type, "worker");
        assert!(agent.auto_start);
        assert!((agent.llm.temperature - 0.2).abs() < f64::EPSILON);

        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.function("summarize").unwrap().function_type, "llm");
        assert!(config.function("missing").is_none());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = SystemConfig::from_yaml("{}").unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.system.log_level, "info");
    }

    #[test]
    fn invalid_yaml_is_a_validation_error() {
        let err = SystemConfig::from_yaml("system: [not, a, map]").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = SystemConfig::from_file(&path).unwrap();
        assert_eq!(config.agents[0].functions, vec!["text_analysis", "echo"]);
    }
}
