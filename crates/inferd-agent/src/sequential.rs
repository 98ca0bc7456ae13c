//! Sequential workflow execution with retries, timeouts and cancellation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use inferd_core::data::{AgentData, FunctionResult};
use inferd_core::error::CoreError;

use crate::manager::AgentManager;

/// Linear backoff base: attempt `n` sleeps `n * 1000` ms before retrying.
const RETRY_BACKOFF: Duration = Duration::from_millis(1000);

pub type Precondition = Arc<dyn Fn(&AgentData) -> bool + Send + Sync>;
pub type Validation = Arc<dyn Fn(&FunctionResult) -> bool + Send + Sync>;
pub type ResultProcessor = Arc<dyn Fn(&AgentData, &FunctionResult) -> AgentData + Send + Sync>;
pub type StepCompleteCallback = Arc<dyn Fn(&str, &FunctionResult) + Send + Sync>;
pub type StepErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type WorkflowCompleteCallback = Arc<dyn Fn(&SequentialWorkflowResult) + Send + Sync>;

/// One step of a sequential workflow.
#[derive(Clone)]
pub struct SequentialStep {
    pub step_id: String,
    pub step_name: String,
    pub agent_id: String,
    pub function_name: String,
    pub parameters: AgentData,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub continue_on_failure: bool,
    pub precondition: Option<Precondition>,
    pub validation: Option<Validation>,
    pub result_processor: Option<ResultProcessor>,
}

impl SequentialStep {
    #[must_use]
    pub fn new(
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        agent_id: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            agent_id: agent_id.into(),
            function_name: function_name.into(),
            parameters: AgentData::new(),
            timeout_seconds: 60,
            max_retries: 0,
            continue_on_failure: false,
            precondition: None,
            validation: None,
            result_processor: None,
        }
    }
}

impl fmt::Debug for SequentialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialStep")
            .field("step_id", &self.step_id)
            .field("agent_id", &self.agent_id)
            .field("function_name", &self.function_name)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// An ordered list of steps with failure policy and context threading.
#[derive(Clone, Default)]
pub struct SequentialWorkflow {
    pub workflow_id: String,
    pub workflow_name: String,
    pub description: String,
    pub steps: Vec<SequentialStep>,
    pub stop_on_failure: bool,
    pub max_execution_time_seconds: u64,
    pub global_context: AgentData,
    pub metadata: HashMap<String, String>,
    pub on_step_complete: Option<StepCompleteCallback>,
    pub on_step_error: Option<StepErrorCallback>,
    pub on_workflow_complete: Option<WorkflowCompleteCallback>,
}

impl SequentialWorkflow {
    #[must_use]
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            stop_on_failure: true,
            max_execution_time_seconds: 300,
            ..Self::default()
        }
    }
}

impl fmt::Debug for SequentialWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialWorkflow")
            .field("workflow_id", &self.workflow_id)
            .field("steps", &self.steps.len())
            .field("stop_on_failure", &self.stop_on_failure)
            .finish_non_exhaustive()
    }
}

/// Fluent construction of workflows; step modifiers apply to the most
/// recently added step.
pub struct SequentialWorkflowBuilder {
    workflow: SequentialWorkflow,
}

impl SequentialWorkflowBuilder {
    #[must_use]
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow: SequentialWorkflow::new(workflow_id, name),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.workflow.description = description.into();
        self
    }

    #[must_use]
    pub fn global_context(mut self, context: AgentData) -> Self {
        self.workflow.global_context = context;
        self
    }

    #[must_use]
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.workflow.stop_on_failure = stop;
        self
    }

    #[must_use]
    pub fn max_execution_time(mut self, seconds: u64) -> Self {
        self.workflow.max_execution_time_seconds = seconds;
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.workflow.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn add_step(mut self, step: SequentialStep) -> Self {
        self.workflow.steps.push(step);
        self
    }

    #[must_use]
    pub fn step(
        self,
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        agent_id: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        self.add_step(SequentialStep::new(step_id, step_name, agent_id, function_name))
    }

    #[must_use]
    pub fn step_parameters(mut self, parameters: AgentData) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.parameters = parameters;
        }
        self
    }

    #[must_use]
    pub fn step_timeout(mut self, seconds: u64) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.timeout_seconds = seconds;
        }
        self
    }

    #[must_use]
    pub fn step_retries(mut self, retries: u32) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.max_retries = retries;
        }
        self
    }

    #[must_use]
    pub fn step_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.continue_on_failure = continue_on_failure;
        }
        self
    }

    #[must_use]
    pub fn step_precondition(mut self, precondition: Precondition) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.precondition = Some(precondition);
        }
        self
    }

    #[must_use]
    pub fn step_validation(mut self, validation: Validation) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.validation = Some(validation);
        }
        self
    }

    #[must_use]
    pub fn step_processor(mut self, processor: ResultProcessor) -> Self {
        if let Some(step) = self.workflow.steps.last_mut() {
            step.result_processor = Some(processor);
        }
        self
    }

    #[must_use]
    pub fn on_step_complete(mut self, callback: StepCompleteCallback) -> Self {
        self.workflow.on_step_complete = Some(callback);
        self
    }

    #[must_use]
    pub fn on_step_error(mut self, callback: StepErrorCallback) -> Self {
        self.workflow.on_step_error = Some(callback);
        self
    }

    #[must_use]
    pub fn on_workflow_complete(mut self, callback: WorkflowCompleteCallback) -> Self {
        self.workflow.on_workflow_complete = Some(callback);
        self
    }

    #[must_use]
    pub fn build(self) -> SequentialWorkflow {
        self.workflow
    }
}

/// Full record of one workflow execution.
#[derive(Debug, Clone, Default)]
pub struct SequentialWorkflowResult {
    pub workflow_id: String,
    pub workflow_name: String,
    pub success: bool,
    pub error_message: String,
    pub executed_steps: Vec<String>,
    pub step_results: HashMap<String, FunctionResult>,
    pub step_errors: HashMap<String, String>,
    pub step_execution_times_ms: HashMap<String, f64>,
    pub total_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub initial_context: AgentData,
    pub final_context: AgentData,
    pub total_execution_time_ms: f64,
}

/// Registers validated workflows and executes them step by step.
pub struct SequentialWorkflowExecutor {
    agents: Arc<AgentManager>,
    workflows: Mutex<HashMap<String, SequentialWorkflow>>,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
    results: Mutex<HashMap<String, SequentialWorkflowResult>>,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl SequentialWorkflowExecutor {
    #[must_use]
    pub fn new(agents: Arc<AgentManager>) -> Self {
        tracing::info!("Sequential workflow executor initialized");
        Self {
            agents,
            workflows: Mutex::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Register a workflow after validation: unique id, non-empty steps,
    /// non-empty step fields, unique step ids, and every referenced agent
    /// must exist.
    pub fn register_workflow(&self, workflow: SequentialWorkflow) -> Result<(), CoreError> {
        {
            let workflows = self.workflows.lock().expect("workflows lock poisoned");
            if workflows.contains_key(&workflow.workflow_id) {
                tracing::warn!(workflow_id = %workflow.workflow_id, "Workflow already exists");
                return Err(CoreError::Conflict(format!(
                    "workflow '{}' already exists",
                    workflow.workflow_id
                )));
            }
        }

        self.validate_workflow(&workflow)?;

        let workflow_id = workflow.workflow_id.clone();
        let step_count = workflow.steps.len();
        self.workflows
            .lock()
            .expect("workflows lock poisoned")
            .insert(workflow_id.clone(), workflow);
        self.cancel_flags
            .lock()
            .expect("cancel flags lock poisoned")
            .insert(workflow_id.clone(), Arc::new(AtomicBool::new(false)));

        tracing::info!(workflow_id = %workflow_id, steps = step_count, "Registered sequential workflow");
        Ok(())
    }

    fn validate_workflow(&self, workflow: &SequentialWorkflow) -> Result<(), CoreError> {
        if workflow.workflow_id.is_empty() {
            return Err(CoreError::Validation("workflow id is empty".to_string()));
        }
        if workflow.steps.is_empty() {
            return Err(CoreError::Validation("workflow has no steps".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &workflow.steps {
            if step.step_id.is_empty() || step.agent_id.is_empty() || step.function_name.is_empty()
            {
                return Err(CoreError::Validation(format!(
                    "step '{}' is missing id, agent or function",
                    step.step_id
                )));
            }
            if !seen.insert(step.step_id.clone()) {
                tracing::error!(step_id = %step.step_id, "Duplicate step id");
                return Err(CoreError::Validation(format!(
                    "duplicate step id: {}",
                    step.step_id
                )));
            }
            if self.agents.get_agent(&step.agent_id).is_none() {
                tracing::error!(step_id = %step.step_id, agent_id = %step.agent_id, "Agent not found for step");
                return Err(CoreError::Validation(format!(
                    "agent not found for step {}: {}",
                    step.step_id, step.agent_id
                )));
            }
        }
        Ok(())
    }

    pub fn remove_workflow(&self, workflow_id: &str) -> Result<(), CoreError> {
        let removed = self
            .workflows
            .lock()
            .expect("workflows lock poisoned")
            .remove(workflow_id);
        if removed.is_none() {
            return Err(CoreError::NotFound(format!("workflow {workflow_id}")));
        }
        if let Some(flag) = self
            .cancel_flags
            .lock()
            .expect("cancel flags lock poisoned")
            .remove(workflow_id)
        {
            flag.store(true, Ordering::SeqCst);
        }
        self.results
            .lock()
            .expect("results lock poisoned")
            .remove(workflow_id);
        tracing::info!(workflow_id, "Removed workflow");
        Ok(())
    }

    #[must_use]
    pub fn list_workflows(&self) -> Vec<String> {
        self.workflows
            .lock()
            .expect("workflows lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_workflow(&self, workflow_id: &str) -> Option<SequentialWorkflow> {
        self.workflows
            .lock()
            .expect("workflows lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    /// Execute a workflow to completion and store its result.
    pub async fn execute_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        input_context: AgentData,
    ) -> SequentialWorkflowResult {
        let Some(workflow) = self.get_workflow(workflow_id) else {
            return SequentialWorkflowResult {
                workflow_id: workflow_id.to_string(),
                error_message: format!("Workflow not found: {workflow_id}"),
                ..SequentialWorkflowResult::default()
            };
        };

        tracing::info!(workflow_id, "Executing sequential workflow");
        self.active.fetch_add(1, Ordering::SeqCst);

        let result = self.execute_workflow_internal(&workflow, input_context).await;

        self.results
            .lock()
            .expect("results lock poisoned")
            .insert(workflow_id.to_string(), result.clone());
        self.active.fetch_sub(1, Ordering::SeqCst);
        if result.success {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(callback) = &workflow.on_workflow_complete {
            callback(&result);
        }
        result
    }

    /// Fire-and-forget execution; progress is observable via status/result
    /// queries. Returns an execution id.
    #[must_use]
    pub fn execute_workflow_async(
        self: &Arc<Self>,
        workflow_id: &str,
        input_context: AgentData,
    ) -> String {
        let execution_id = format!("exec_{workflow_id}_{}", chrono::Utc::now().timestamp());
        let executor = Arc::clone(self);
        let workflow_id = workflow_id.to_string();
        let exec_id = execution_id.clone();
        tokio::spawn(async move {
            let result = executor.execute_workflow(&workflow_id, input_context).await;
            tracing::info!(
                execution_id = %exec_id,
                success = result.success,
                "Async workflow completed"
            );
        });
        execution_id
    }

    /// Request cooperative cancellation; checked before each step and
    /// between retries.
    pub fn cancel_workflow(&self, workflow_id: &str) -> bool {
        let flags = self.cancel_flags.lock().expect("cancel flags lock poisoned");
        match flags.get(workflow_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!(workflow_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get_workflow_result(&self, workflow_id: &str) -> Option<SequentialWorkflowResult> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    /// Coarse status map: `not_found`, `cancelled`, `completed`, `failed` or
    /// `registered`, with counters when a result exists.
    #[must_use]
    pub fn workflow_status(&self, workflow_id: &str) -> HashMap<String, String> {
        let mut status = HashMap::new();

        let workflow = self.get_workflow(workflow_id);
        let Some(workflow) = workflow else {
            status.insert("status".to_string(), "not_found".to_string());
            return status;
        };
        status.insert("workflow_name".to_string(), workflow.workflow_name);
        status.insert("total_steps".to_string(), workflow.steps.len().to_string());

        let cancelled = self
            .cancel_flags
            .lock()
            .expect("cancel flags lock poisoned")
            .get(workflow_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if cancelled {
            status.insert("status".to_string(), "cancelled".to_string());
            return status;
        }

        match self.get_workflow_result(workflow_id) {
            Some(result) => {
                status.insert(
                    "status".to_string(),
                    if result.success { "completed" } else { "failed" }.to_string(),
                );
                status.insert(
                    "executed_steps".to_string(),
                    result.executed_steps.len().to_string(),
                );
                status.insert(
                    "successful_steps".to_string(),
                    result.successful_steps.to_string(),
                );
                status.insert("failed_steps".to_string(), result.failed_steps.to_string());
                status.insert(
                    "execution_time_ms".to_string(),
                    result.total_execution_time_ms.to_string(),
                );
                if !result.error_message.is_empty() {
                    status.insert("error".to_string(), result.error_message);
                }
            }
            None => {
                status.insert("status".to_string(), "registered".to_string());
            }
        }
        status
    }

    #[must_use]
    pub fn executor_metrics(&self) -> HashMap<String, usize> {
        let registered = self.workflows.lock().expect("workflows lock poisoned").len();
        HashMap::from([
            ("active_workflows".to_string(), self.active.load(Ordering::SeqCst)),
            ("completed_workflows".to_string(), self.completed.load(Ordering::SeqCst)),
            ("failed_workflows".to_string(), self.failed.load(Ordering::SeqCst)),
            ("total_registered_workflows".to_string(), registered),
        ])
    }

    fn is_cancelled(&self, workflow_id: &str) -> bool {
        self.cancel_flags
            .lock()
            .expect("cancel flags lock poisoned")
            .get(workflow_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    async fn execute_workflow_internal(
        &self,
        workflow: &SequentialWorkflow,
        input_context: AgentData,
    ) -> SequentialWorkflowResult {
        let started = Instant::now();
        let mut result = SequentialWorkflowResult {
            workflow_id: workflow.workflow_id.clone(),
            workflow_name: workflow.workflow_name.clone(),
            total_steps: workflow.steps.len(),
            initial_context: input_context.clone(),
            ..SequentialWorkflowResult::default()
        };

        // Working context: global ⊕ input, input winning on collisions.
        let mut context = workflow.global_context.merged_with(&input_context);

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            steps = workflow.steps.len(),
            "Starting workflow execution"
        );

        let mut aborted = false;
        for (index, step) in workflow.steps.iter().enumerate() {
            if self.is_cancelled(&workflow.workflow_id) {
                result.error_message = "Workflow cancelled".to_string();
                aborted = true;
                break;
            }
            if started.elapsed().as_secs() > workflow.max_execution_time_seconds {
                result.error_message = "Workflow timeout exceeded".to_string();
                aborted = true;
                break;
            }

            tracing::info!(
                step = index + 1,
                total = workflow.steps.len(),
                step_name = %step.step_name,
                "Executing step"
            );

            let step_started = Instant::now();
            let outcome = self.execute_step(&workflow.workflow_id, step, &context).await;
            let step_time = step_started.elapsed().as_secs_f64() * 1000.0;

            result.executed_steps.push(step.step_id.clone());
            result
                .step_execution_times_ms
                .insert(step.step_id.clone(), step_time);

            match outcome {
                Ok(step_result) => {
                    result.successful_steps += 1;
                    context = process_step_result(step, &context, &step_result);

                    if let Some(callback) = &workflow.on_step_complete {
                        callback(&step.step_id, &step_result);
                    }
                    tracing::info!(
                        workflow_id = %workflow.workflow_id,
                        step_id = %step.step_id,
                        time_ms = step_time,
                        "Step completed"
                    );
                    result.step_results.insert(step.step_id.clone(), step_result);
                }
                Err((step_result, step_error)) => {
                    result.failed_steps += 1;
                    result
                        .step_errors
                        .insert(step.step_id.clone(), step_error.clone());
                    result.step_results.insert(step.step_id.clone(), step_result);

                    if let Some(callback) = &workflow.on_step_error {
                        callback(&step.step_id, &step_error);
                    }
                    tracing::error!(step_id = %step.step_id, error = %step_error, "Step failed");

                    if step_error == "Workflow cancelled" {
                        result.error_message = step_error;
                        aborted = true;
                        break;
                    }
                    if workflow.stop_on_failure && !step.continue_on_failure {
                        result.error_message =
                            format!("Step {} failed: {step_error}", step.step_id);
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if !aborted && result.error_message.is_empty() {
            result.success = result.failed_steps == 0 || !workflow.stop_on_failure;
        }

        result.total_execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.final_context = context;

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            success = result.success,
            time_ms = result.total_execution_time_ms,
            "Workflow execution completed"
        );
        result
    }

    /// Run one step with retries. The error carries the final failed result
    /// and its message.
    async fn execute_step(
        &self,
        workflow_id: &str,
        step: &SequentialStep,
        context: &AgentData,
    ) -> Result<FunctionResult, (FunctionResult, String)> {
        if let Some(precondition) = &step.precondition {
            if !precondition(context) {
                let message = "Step precondition failed".to_string();
                return Err((FunctionResult::fail(&message), message));
            }
        }

        let Some(agent) = self.agents.get_agent(&step.agent_id) else {
            let message = format!("Agent not found: {}", step.agent_id);
            return Err((FunctionResult::fail(&message), message));
        };

        // Step parameters overlay the workflow context for this invocation.
        let invocation_context = context.merged_with(&step.parameters);

        let mut attempt: u32 = 0;
        loop {
            let call = agent.execute_function(&step.function_name, &invocation_context);
            let result = match tokio::time::timeout(
                Duration::from_secs(step.timeout_seconds.max(1)),
                call,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => FunctionResult::fail("Step execution timed out"),
            };

            let valid = step
                .validation
                .as_ref()
                .map_or(result.success, |validation| validation(&result));
            if result.success && valid {
                return Ok(result);
            }

            if attempt < step.max_retries {
                attempt += 1;
                tracing::warn!(
                    step_id = %step.step_id,
                    attempt,
                    "Step attempt failed, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                if self.is_cancelled(workflow_id) {
                    let message = "Workflow cancelled".to_string();
                    return Err((FunctionResult::fail(&message), message));
                }
            } else {
                let message = if result.error_message.is_empty() {
                    "Step validation failed".to_string()
                } else {
                    result.error_message.clone()
                };
                return Err((result, message));
            }
        }
    }
}

fn process_step_result(
    step: &SequentialStep,
    context: &AgentData,
    result: &FunctionResult,
) -> AgentData {
    if let Some(processor) = &step.result_processor {
        return processor(context, result);
    }
    // Default: merge the result payload into the running context.
    context.merged_with(&result.result)
}
