//! The agent actor: function registry, job queue, events and mailbox under
//! one addressable id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use inferd_core::data::{AgentData, FunctionResult};
use inferd_core::error::CoreError;
use inferd_core::message::AgentMessage;

use crate::events::EventSystem;
use crate::functions::{
    AgentFunction, BuiltinFn, FunctionContext, FunctionEntry, FunctionRegistry,
};
use crate::jobs::JobManager;
use crate::router::MessageRouter;

/// An addressable actor with an id, capabilities and message handling.
///
/// Capability edits and message handling use separate locks so a handler
/// that calls back into the agent cannot self-deadlock.
pub struct AgentCore {
    id: String,
    name: String,
    agent_type: String,
    capabilities: Mutex<Vec<String>>,
    registry: Arc<FunctionRegistry>,
    jobs: Arc<JobManager>,
    events: Arc<EventSystem>,
    router: Mutex<Option<Weak<MessageRouter>>>,
    running: AtomicBool,
}

impl AgentCore {
    /// Create an agent with the default function set registered.
    #[must_use]
    pub fn new(name: &str, agent_type: &str, context: FunctionContext) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        let name = if name.is_empty() {
            format!("Agent-{}", &id[..8])
        } else {
            name.to_string()
        };

        let registry = Arc::new(FunctionRegistry::new(context));
        for (fn_name, builtin) in [
            ("add", BuiltinFn::Add),
            ("echo", BuiltinFn::Echo),
            ("delay", BuiltinFn::Delay),
            ("text_analysis", BuiltinFn::TextAnalysis),
            ("data_transform", BuiltinFn::DataTransform),
        ] {
            registry.register(FunctionEntry::new(
                fn_name,
                "",
                AgentFunction::Builtin(builtin),
            ));
        }
        registry.register(FunctionEntry::new(
            "inference",
            "Bridge to an inference engine",
            AgentFunction::Inference {
                engine_id: "default".to_string(),
            },
        ));

        let agent = Arc::new(Self {
            jobs: Arc::new(JobManager::new(Arc::clone(&registry))),
            registry,
            events: Arc::new(EventSystem::new()),
            capabilities: Mutex::new(Vec::new()),
            router: Mutex::new(None),
            running: AtomicBool::new(false),
            name: name.clone(),
            agent_type: agent_type.to_string(),
            id,
        });
        tracing::info!(agent = %name, id = %&agent.id[..8], "Agent created");
        agent
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventSystem> {
        &self.events
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.jobs.start();
        self.events.start();
        tracing::info!(agent = %self.name, "Agent started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.jobs.stop().await;
        self.events.stop();
        tracing::info!(agent = %self.name, "Agent stopped");
    }

    /// Attach the router and register this agent's delivery callback. The
    /// router holds only the agent id and a weak back-reference.
    pub fn set_message_router(self: &Arc<Self>, router: &Arc<MessageRouter>) {
        *self.router.lock().expect("router lock poisoned") = Some(Arc::downgrade(router));

        let weak = Arc::downgrade(self);
        router.register_handler(
            &self.id,
            Arc::new(move |message| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(agent) = weak.upgrade() {
                        agent.handle_message(message).await;
                    }
                })
            }),
        );
        tracing::debug!(agent = %self.name, "Message router set");
    }

    /// Synchronous function execution through the registry.
    pub async fn execute_function(&self, name: &str, params: &AgentData) -> FunctionResult {
        self.registry.execute(name, params).await
    }

    /// Queue a function invocation; returns the job id.
    pub fn execute_function_async(
        &self,
        name: &str,
        params: AgentData,
        priority: i32,
    ) -> Result<Uuid, CoreError> {
        if !self.is_running() {
            return Err(CoreError::Execution(format!(
                "agent {} is not running",
                self.name
            )));
        }
        if name.is_empty() {
            return Err(CoreError::Validation("function name cannot be empty".to_string()));
        }
        if priority < 0 {
            return Err(CoreError::Validation("priority cannot be negative".to_string()));
        }
        Ok(self.jobs.submit_job(name, params, priority, &self.id))
    }

    pub fn send_message(&self, to_agent: &str, msg_type: &str, payload: AgentData) {
        let router = self
            .router
            .lock()
            .expect("router lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        match router {
            Some(router) => {
                let message =
                    AgentMessage::new(&self.id, to_agent, msg_type).with_payload(payload);
                router.route_message(message);
            }
            None => tracing::warn!(agent = %self.name, "No message router set"),
        }
    }

    pub fn broadcast_message(&self, msg_type: &str, payload: AgentData) {
        let router = self
            .router
            .lock()
            .expect("router lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        match router {
            Some(router) => {
                let message = AgentMessage::new(&self.id, "", msg_type).with_payload(payload);
                router.broadcast_message(&message);
            }
            None => tracing::warn!(agent = %self.name, "No message router set"),
        }
    }

    pub fn add_capability(&self, capability: &str) {
        if capability.is_empty() {
            tracing::warn!(agent = %self.name, "Attempted to add empty capability");
            return;
        }
        let mut capabilities = self.capabilities.lock().expect("capabilities lock poisoned");
        if capabilities.iter().any(|c| c == capability) {
            tracing::debug!(agent = %self.name, capability, "Capability already exists");
            return;
        }
        capabilities.push(capability.to_string());
        tracing::debug!(agent = %self.name, capability, "Capability added");
    }

    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .lock()
            .expect("capabilities lock poisoned")
            .clone()
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .lock()
            .expect("capabilities lock poisoned")
            .iter()
            .any(|c| c == capability)
    }

    /// Mailbox entry point, invoked on the router's task.
    pub async fn handle_message(&self, message: AgentMessage) {
        if !self.is_running() {
            tracing::warn!(agent = %self.name, "Ignoring message - agent is not running");
            return;
        }
        if message.from_agent.is_empty() {
            tracing::warn!(agent = %self.name, "Received message with empty sender id");
            return;
        }

        tracing::debug!(agent = %self.name, msg_type = %message.msg_type, from = %message.from_agent, "Received message");

        match message.msg_type.as_str() {
            "ping" => {
                let payload = AgentData::new()
                    .with("timestamp", chrono::Utc::now().timestamp().to_string());
                self.send_message(&message.from_agent, "pong", payload);
            }
            "greeting" => {
                let greeting = message.payload.get_str_or("message", "");
                if !greeting.is_empty() {
                    tracing::info!(agent = %self.name, greeting, "Greeting received");
                }
            }
            "function_request" => {
                let function_name = message.payload.get_str_or("function", "").to_string();
                let response = if function_name.is_empty() {
                    let mut response = AgentData::new();
                    response.set("success", false);
                    response.set("error_message", "Missing function name in function request");
                    response
                } else {
                    let result = self.execute_function(&function_name, &message.payload).await;
                    let mut response = AgentData::new();
                    response.set("success", result.success);
                    response.set("error_message", result.error_message);
                    response.set("execution_time_ms", result.execution_time_ms);
                    response.set("result_data", result.result);
                    response
                };
                self.send_message(&message.from_agent, "function_response", response);
            }
            _ => {}
        }

        let mut event_data = AgentData::new();
        event_data.set("agent_id", self.id.clone());
        event_data.set("from_agent", message.from_agent.clone());
        event_data.set("message_type", message.msg_type.clone());
        self.events.emit("message_received", &self.id, event_data);
    }
}
