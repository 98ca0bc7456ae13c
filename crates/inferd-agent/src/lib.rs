//! Agent substrate and workflow orchestration.
//!
//! An agent is an addressable actor owning a function registry, a priority
//! job queue and a mailbox. [`AgentManager`] runs the config-driven fleet;
//! [`SequentialWorkflowExecutor`] and [`AgentOrchestrator`] compose agent
//! function calls into step-by-step and DAG workflows.
//!
//! Ownership is arena-plus-id: the manager owns every [`AgentCore`]; the
//! message router holds only string agent ids and delivery closures.
//! Inference is reached exclusively through the `CompletionBackend` port.

mod agent;
mod events;
mod functions;
mod jobs;
mod manager;
mod orchestrator;
mod router;
mod sequential;

pub use agent::AgentCore;
pub use events::{AgentEvent, EventHandler, EventSystem};
pub use functions::{
    AgentFunction, BuiltinFn, FunctionContext, FunctionEntry, FunctionKind, FunctionRegistry,
    NativeHandler,
};
pub use jobs::{JobManager, JobStats};
pub use manager::{AgentManager, AgentSystemStatus, build_function};
pub use orchestrator::{
    AgentOrchestrator, CollaborationGroup, CollaborationPattern, OrchestratorWorkflow,
    ResultAggregator, WorkflowResult, WorkflowStep,
};
pub use router::{DeliveryHandler, MessageRouter};
pub use sequential::{
    SequentialStep, SequentialWorkflow, SequentialWorkflowBuilder, SequentialWorkflowExecutor,
    SequentialWorkflowResult,
};
