//! DAG workflow engine, collaboration patterns and load-balanced dispatch.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use inferd_core::data::{AgentData, FunctionResult};
use inferd_core::error::CoreError;

use crate::manager::AgentManager;

/// Bounded wait when joining the workflow worker at stop time.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One node of a DAG workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStep {
    pub step_id: String,
    pub agent_id: String,
    pub function_name: String,
    pub parameters: AgentData,
    pub dependencies: Vec<String>,
    pub parallel_allowed: bool,
}

/// A dependency-ordered workflow. Cyclicity surfaces at execution time.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorWorkflow {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub global_context: AgentData,
}

/// Outcome of a DAG execution.
#[derive(Debug, Clone, Default)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub success: bool,
    pub error_message: String,
    pub step_results: HashMap<String, FunctionResult>,
    pub total_execution_time_ms: f64,
}

/// The six coordination patterns a collaboration group can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaborationPattern {
    Sequential,
    Parallel,
    Pipeline,
    Consensus,
    Hierarchy,
    Negotiation,
}

impl CollaborationPattern {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Pipeline => "pipeline",
            Self::Consensus => "consensus",
            Self::Hierarchy => "hierarchy",
            Self::Negotiation => "negotiation",
        }
    }
}

impl FromStr for CollaborationPattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "pipeline" => Ok(Self::Pipeline),
            "consensus" => Ok(Self::Consensus),
            "hierarchy" => Ok(Self::Hierarchy),
            "negotiation" => Ok(Self::Negotiation),
            other => Err(CoreError::Validation(format!(
                "unknown collaboration pattern: {other}"
            ))),
        }
    }
}

/// Combines parallel results into one payload.
pub type ResultAggregator = Arc<dyn Fn(&[FunctionResult]) -> AgentData + Send + Sync>;

/// A named set of agents executed under one coordination pattern.
#[derive(Clone)]
pub struct CollaborationGroup {
    pub group_id: String,
    pub name: String,
    pub pattern: CollaborationPattern,
    pub agent_ids: Vec<String>,
    pub shared_context: HashMap<String, AgentData>,
    pub result_aggregator: Option<ResultAggregator>,
    pub consensus_threshold: f64,
    pub max_negotiation_rounds: u32,
}

impl CollaborationGroup {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        pattern: CollaborationPattern,
        agent_ids: Vec<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            name: String::new(),
            pattern,
            agent_ids,
            shared_context: HashMap::new(),
            result_aggregator: None,
            consensus_threshold: 0.5,
            max_negotiation_rounds: 3,
        }
    }
}

impl fmt::Debug for CollaborationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaborationGroup")
            .field("group_id", &self.group_id)
            .field("pattern", &self.pattern)
            .field("agent_ids", &self.agent_ids)
            .finish_non_exhaustive()
    }
}

/// DAG workflow engine with a background worker for async executions.
pub struct AgentOrchestrator {
    agents: Arc<AgentManager>,
    workflows: Mutex<HashMap<String, OrchestratorWorkflow>>,
    results: Mutex<HashMap<String, WorkflowResult>>,
    groups: Mutex<HashMap<String, CollaborationGroup>>,
    queue: Mutex<VecDeque<(String, AgentData)>>,
    notify: Notify,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    group_counter: AtomicU64,
}

impl AgentOrchestrator {
    #[must_use]
    pub fn new(agents: Arc<AgentManager>) -> Self {
        Self {
            agents,
            workflows: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            group_counter: AtomicU64::new(0),
        }
    }

    /// Start the async-execution worker. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            orchestrator.worker_loop().await;
        });
        *self.worker.lock().expect("worker lock poisoned") = Some(handle);
        tracing::info!("Agent orchestrator started");
    }

    /// Stop the worker: clear the run flag, kick the queue wait, join with a
    /// bounded timeout. An empty queue cannot starve shutdown.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_one();
        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await;
        }
        tracing::info!("Agent orchestrator stopped");
    }

    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.running.load(Ordering::SeqCst) {
            "running"
        } else {
            "stopped"
        }
    }

    pub fn register_workflow(&self, workflow: OrchestratorWorkflow) -> Result<(), CoreError> {
        let mut workflows = self.workflows.lock().expect("workflows lock poisoned");
        if workflows.contains_key(&workflow.workflow_id) {
            tracing::warn!(workflow_id = %workflow.workflow_id, "Workflow already exists");
            return Err(CoreError::Conflict(format!(
                "workflow '{}' already exists",
                workflow.workflow_id
            )));
        }
        tracing::info!(workflow_id = %workflow.workflow_id, "Registered workflow");
        workflows.insert(workflow.workflow_id.clone(), workflow);
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
    pub fn get_workflow(&self, workflow_id: &str) -> Option<OrchestratorWorkflow> {
        self.workflows
            .lock()
            .expect("workflows lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    /// Execute a DAG workflow synchronously and store the result.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input_context: AgentData,
    ) -> Result<WorkflowResult, CoreError> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let result = self.execute_workflow_internal(&workflow, input_context).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if result.success {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.results
            .lock()
            .expect("results lock poisoned")
            .insert(workflow_id.to_string(), result.clone());
        Ok(result)
    }

    /// Queue a workflow for the background worker.
    pub fn execute_workflow_async(
        &self,
        workflow_id: &str,
        input_context: AgentData,
    ) -> Result<(), CoreError> {
        if !self
            .workflows
            .lock()
            .expect("workflows lock poisoned")
            .contains_key(workflow_id)
        {
            return Err(CoreError::NotFound(format!("workflow {workflow_id}")));
        }
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .push_back((workflow_id.to_string(), input_context));
        self.notify.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn get_workflow_result(&self, workflow_id: &str) -> Option<WorkflowResult> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    #[must_use]
    pub fn orchestration_metrics(&self) -> HashMap<String, usize> {
        let total = self.workflows.lock().expect("workflows lock poisoned").len();
        let groups = self.groups.lock().expect("groups lock poisoned").len();
        HashMap::from([
            ("active_workflows".to_string(), self.active.load(Ordering::SeqCst)),
            ("completed_workflows".to_string(), self.completed.load(Ordering::SeqCst)),
            ("failed_workflows".to_string(), self.failed.load(Ordering::SeqCst)),
            ("total_workflows".to_string(), total),
            ("collaboration_groups".to_string(), groups),
        ])
    }

    async fn worker_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let next = self.queue.lock().expect("queue lock poisoned").pop_front();
            match next {
                Some((workflow_id, input_context)) => {
                    let _ = self.execute_workflow(&workflow_id, input_context).await;
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Round-based DAG scheduling: each round runs every step whose
    /// dependencies completed successfully; parallel-allowed steps fan out
    /// concurrently and join before the round ends.
    async fn execute_workflow_internal(
        &self,
        workflow: &OrchestratorWorkflow,
        input_context: AgentData,
    ) -> WorkflowResult {
        let started = Instant::now();
        let mut result = WorkflowResult {
            workflow_id: workflow.workflow_id.clone(),
            ..WorkflowResult::default()
        };

        let context = workflow.global_context.merged_with(&input_context);
        let mut remaining: Vec<WorkflowStep> = workflow.steps.clone();
        let mut completed: HashMap<String, FunctionResult> = HashMap::new();

        'rounds: while !remaining.is_empty() {
            let ready: Vec<WorkflowStep> = {
                let (ready, rest): (Vec<_>, Vec<_>) = remaining
                    .into_iter()
                    .partition(|step| dependencies_satisfied(step, &completed));
                remaining = rest;
                ready
            };

            if ready.is_empty() {
                result.error_message =
                    "Circular dependency detected or missing dependencies".to_string();
                result.success = false;
                break;
            }

            let (parallel, serial): (Vec<_>, Vec<_>) =
                ready.into_iter().partition(|step| step.parallel_allowed);

            let mut round_results: Vec<(String, FunctionResult)> = Vec::new();

            let mut handles = Vec::new();
            for step in parallel {
                let agents = Arc::clone(&self.agents);
                let step_context = context.clone();
                handles.push(tokio::spawn(async move {
                    let step_result = execute_workflow_step(&agents, &step, &step_context).await;
                    (step.step_id, step_result)
                }));
            }

            for step in serial {
                let step_result = execute_workflow_step(&self.agents, &step, &context).await;
                round_results.push((step.step_id, step_result));
            }

            for handle in handles {
                match handle.await {
                    Ok(entry) => round_results.push(entry),
                    Err(err) => {
                        result.error_message = format!("parallel step panicked: {err}");
                        result.success = false;
                        break 'rounds;
                    }
                }
            }

            let mut round_error = None;
            for (step_id, step_result) in round_results {
                if !step_result.success && round_error.is_none() {
                    round_error = Some(format!(
                        "Step {step_id} failed: {}",
                        step_result.error_message
                    ));
                }
                completed.insert(step_id.clone(), step_result.clone());
                result.step_results.insert(step_id, step_result);
            }
            if let Some(error) = round_error {
                result.error_message = error;
                result.success = false;
                break;
            }
        }

        if remaining.is_empty() && result.error_message.is_empty() {
            result.success = true;
        }
        result.total_execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }

    // ----- Collaboration patterns -----

    pub fn create_collaboration_group(&self, group: CollaborationGroup) -> Result<(), CoreError> {
        let mut groups = self.groups.lock().expect("groups lock poisoned");
        if groups.contains_key(&group.group_id) {
            tracing::warn!(group_id = %group.group_id, "Collaboration group already exists");
            return Err(CoreError::Conflict(format!(
                "collaboration group '{}' already exists",
                group.group_id
            )));
        }
        tracing::info!(group_id = %group.group_id, pattern = group.pattern.as_str(), "Created collaboration group");
        groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    pub fn remove_collaboration_group(&self, group_id: &str) -> Result<(), CoreError> {
        let removed = self
            .groups
            .lock()
            .expect("groups lock poisoned")
            .remove(group_id);
        if removed.is_none() {
            return Err(CoreError::NotFound(format!("collaboration group {group_id}")));
        }
        tracing::info!(group_id, "Removed collaboration group");
        Ok(())
    }

    #[must_use]
    pub fn list_collaboration_groups(&self) -> Vec<String> {
        self.groups
            .lock()
            .expect("groups lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Run a group's pattern over the input; the aggregate is stored in the
    /// group's shared context under `result` and returned.
    pub async fn execute_collaboration(
        &self,
        group_id: &str,
        input_data: AgentData,
    ) -> Result<AgentData, CoreError> {
        let group = self
            .groups
            .lock()
            .expect("groups lock poisoned")
            .get(group_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("collaboration group {group_id}")))?;

        let result = match group.pattern {
            CollaborationPattern::Sequential | CollaborationPattern::Pipeline => {
                self.run_sequential(&group, input_data).await
            }
            CollaborationPattern::Parallel => self.run_parallel(&group, input_data).await,
            CollaborationPattern::Consensus => {
                // No comparison function exists for real votes: the parallel
                // aggregate is returned with the threshold as metadata.
                let mut aggregate = self.run_parallel(&group, input_data).await;
                aggregate.set("consensus_threshold", group.consensus_threshold);
                aggregate
            }
            CollaborationPattern::Hierarchy => self.run_hierarchy(&group, input_data).await,
            CollaborationPattern::Negotiation => self.run_negotiation(&group, input_data).await,
        };

        if let Some(stored) = self
            .groups
            .lock()
            .expect("groups lock poisoned")
            .get_mut(group_id)
        {
            stored.shared_context.clear();
            stored
                .shared_context
                .insert("result".to_string(), result.clone());
        }
        Ok(result)
    }

    #[must_use]
    pub fn collaboration_result(&self, group_id: &str) -> Option<AgentData> {
        self.groups
            .lock()
            .expect("groups lock poisoned")
            .get(group_id)
            .and_then(|group| group.shared_context.get("result").cloned())
    }

    /// Thread the input through each agent's `process` function in order.
    async fn run_sequential(&self, group: &CollaborationGroup, input: AgentData) -> AgentData {
        let mut current = input;
        for agent_id in &group.agent_ids {
            if let Some(agent) = self.agents.get_agent(agent_id) {
                let result = agent.execute_function("process", &current).await;
                if result.success {
                    current = result.result;
                }
            }
        }
        current
    }

    /// Call every agent's `process` concurrently and aggregate.
    async fn run_parallel(&self, group: &CollaborationGroup, input: AgentData) -> AgentData {
        let mut handles = Vec::new();
        for agent_id in &group.agent_ids {
            let agents = Arc::clone(&self.agents);
            let agent_id = agent_id.clone();
            let input = input.clone();
            handles.push(tokio::spawn(async move {
                match agents.get_agent(&agent_id) {
                    Some(agent) => agent.execute_function("process", &input).await,
                    None => FunctionResult::fail(format!("Agent {agent_id} not found")),
                }
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => results.push(FunctionResult::fail(format!("task panicked: {err}"))),
            }
        }

        if let Some(aggregator) = &group.result_aggregator {
            return aggregator(&results);
        }

        let mut aggregated = AgentData::new();
        let mut success_count = 0usize;
        for result in &results {
            if result.success {
                aggregated.set(format!("result_{success_count}"), result.result.clone());
                success_count += 1;
            }
        }
        aggregated.set("success_count", success_count);
        aggregated
    }

    /// First agent is master: its `coordinate` function drives the group.
    async fn run_hierarchy(&self, group: &CollaborationGroup, input: AgentData) -> AgentData {
        let Some(master_id) = group.agent_ids.first() else {
            return AgentData::new();
        };
        let Some(master) = self.agents.get_agent(master_id) else {
            return AgentData::new().with("error", "Master agent not found");
        };
        master.execute_function("coordinate", &input).await.result
    }

    /// Bounded negotiation rounds; the first successful `negotiate` response
    /// each round becomes the next proposal.
    async fn run_negotiation(&self, group: &CollaborationGroup, input: AgentData) -> AgentData {
        let mut proposal = input;
        for _round in 0..group.max_negotiation_rounds {
            let mut responses = Vec::new();
            for agent_id in &group.agent_ids {
                if let Some(agent) = self.agents.get_agent(agent_id) {
                    let result = agent.execute_function("negotiate", &proposal).await;
                    if result.success {
                        responses.push(result.result);
                    }
                }
            }
            if let Some(first) = responses.into_iter().next() {
                proposal = first;
            }
        }
        proposal
    }

    /// Ad-hoc coordination without a pre-created group.
    pub async fn coordinate_agents(
        &self,
        agent_ids: Vec<String>,
        coordination_type: &str,
        parameters: AgentData,
    ) -> Result<AgentData, CoreError> {
        let pattern = match coordination_type {
            "sequential" => CollaborationPattern::Sequential,
            "parallel" => CollaborationPattern::Parallel,
            other => {
                tracing::error!(coordination_type = other, "Unknown coordination type");
                return Err(CoreError::Validation(format!(
                    "unknown coordination type: {other}"
                )));
            }
        };

        let group_id = self.generate_group_id();
        let mut group = CollaborationGroup::new(&group_id, pattern, agent_ids);
        group.name = "Auto-generated coordination group".to_string();
        self.create_collaboration_group(group)?;
        self.execute_collaboration(&group_id, parameters).await
    }

    /// Register a pipeline group under its name.
    pub fn setup_pipeline(&self, agent_ids: Vec<String>, pipeline_name: &str) -> Result<(), CoreError> {
        let mut group =
            CollaborationGroup::new(pipeline_name, CollaborationPattern::Pipeline, agent_ids);
        group.name = pipeline_name.to_string();
        self.create_collaboration_group(group)
    }

    pub async fn execute_pipeline(
        &self,
        pipeline_name: &str,
        input_data: AgentData,
    ) -> Result<AgentData, CoreError> {
        self.execute_collaboration(pipeline_name, input_data).await
    }

    // ----- Load balancing -----

    /// Pick the capability holder with the lowest computed load.
    #[must_use]
    pub fn select_optimal_agent(&self, capability: &str, _context: &AgentData) -> Option<String> {
        let candidates = self.agents_by_capability(capability);
        let mut best: Option<(String, f64)> = None;
        for agent_id in candidates {
            let load = self.agent_load(&agent_id);
            match &best {
                Some((_, best_load)) if load >= *best_load => {}
                _ => best = Some((agent_id, load)),
            }
        }
        best.map(|(agent_id, _)| agent_id)
    }

    /// Round-robin a list of task payloads across capable agents, each as a
    /// detached invocation. Returns how many tasks were dispatched.
    pub fn distribute_workload(
        &self,
        task_type: &str,
        tasks: Vec<AgentData>,
    ) -> Result<usize, CoreError> {
        let candidates = self.agents_by_capability(task_type);
        if candidates.is_empty() {
            tracing::error!(task_type, "No agents found for task type");
            return Err(CoreError::NotFound(format!(
                "no agents with capability {task_type}"
            )));
        }

        let mut dispatched = 0;
        for (index, task) in tasks.into_iter().enumerate() {
            let agent_id = &candidates[index % candidates.len()];
            if let Some(agent) = self.agents.get_agent(agent_id) {
                let task_type = task_type.to_string();
                tokio::spawn(async move {
                    let _ = agent.execute_function(&task_type, &task).await;
                });
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Log-only overload report: flags agents above 1.5× the average load.
    pub fn optimize_allocation(&self) {
        let agent_ids = self.agents.list_agents();
        if agent_ids.is_empty() {
            return;
        }

        let loads: Vec<(String, f64)> = agent_ids
            .iter()
            .map(|id| (id.clone(), self.agent_load(id)))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average = loads.iter().map(|(_, load)| load).sum::<f64>() / loads.len() as f64;

        for (agent_id, load) in loads {
            if load > average * 1.5 {
                tracing::warn!(agent_id = %agent_id, load, average, "Agent is overloaded");
            }
        }
    }

    /// Load heuristic: a function of the orchestrator's active workflows.
    #[allow(clippy::cast_precision_loss)]
    fn agent_load(&self, agent_id: &str) -> f64 {
        if self.agents.get_agent(agent_id).is_none() {
            return 0.0;
        }
        self.active.load(Ordering::SeqCst) as f64 / 10.0
    }

    fn agents_by_capability(&self, capability: &str) -> Vec<String> {
        self.agents
            .list_agents()
            .into_iter()
            .filter(|agent_id| {
                self.agents
                    .get_agent(agent_id)
                    .is_some_and(|agent| agent.has_capability(capability))
            })
            .collect()
    }

    fn generate_group_id(&self) -> String {
        format!(
            "group_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            self.group_counter.fetch_add(1, Ordering::SeqCst)
        )
    }
}

fn dependencies_satisfied(
    step: &WorkflowStep,
    completed: &HashMap<String, FunctionResult>,
) -> bool {
    step.dependencies
        .iter()
        .all(|dep| completed.get(dep).is_some_and(|result| result.success))
}

async fn execute_workflow_step(
    agents: &Arc<AgentManager>,
    step: &WorkflowStep,
    context: &AgentData,
) -> FunctionResult {
    let Some(agent) = agents.get_agent(&step.agent_id) else {
        return FunctionResult::fail(format!("Agent {} not found", step.agent_id));
    };
    let step_context = context.merged_with(&step.parameters);
    agent.execute_function(&step.function_name, &step_context).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{AgentFunction, FunctionContext, FunctionEntry};
    use inferd_core::config::AgentConfig;

    async fn fleet(names: &[&str]) -> (Arc<AgentManager>, Vec<String>) {
        let manager = Arc::new(AgentManager::new(FunctionContext::default()));
        let mut ids = Vec::new();
        for name in names {
            let id = manager
                .create_agent(&AgentConfig {
                    name: (*name).to_string(),
                    agent_type: "generic".to_string(),
                    ..AgentConfig::default()
                })
                .unwrap();
            manager.start_agent(&id).unwrap();
            ids.push(id);
        }
        (manager, ids)
    }

    fn register_tracking_fn(
        manager: &AgentManager,
        agent_id: &str,
        fn_name: &str,
        log: &Arc<Mutex<Vec<String>>>,
        active: &Arc<AtomicUsize>,
        max_active: &Arc<AtomicUsize>,
        tag: &str,
    ) {
        let log = Arc::clone(log);
        let active = Arc::clone(active);
        let max_active = Arc::clone(max_active);
        let tag = tag.to_string();
        manager
            .get_agent(agent_id)
            .unwrap()
            .registry()
            .register(FunctionEntry::new(
                fn_name,
                "",
                AgentFunction::Native(Arc::new(move |_params| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(40));
                    active.fetch_sub(1, Ordering::SeqCst);
                    log.lock().unwrap().push(tag.clone());
                    FunctionResult::ok()
                })),
            ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dag_runs_parallel_steps_concurrently_and_joins() {
        let (manager, ids) = fleet(&["worker"]).await;
        let agent_id = &ids[0];

        let log = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        for (fn_name, tag) in [("f1", "S1"), ("f2", "S2"), ("f3", "S3"), ("f4", "S4")] {
            register_tracking_fn(&manager, agent_id, fn_name, &log, &active, &max_active, tag);
        }

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        let workflow = OrchestratorWorkflow {
            workflow_id: "dag".to_string(),
            name: "fan out".to_string(),
            steps: vec![
                WorkflowStep {
                    step_id: "S1".to_string(),
                    agent_id: agent_id.clone(),
                    function_name: "f1".to_string(),
                    ..WorkflowStep::default()
                },
                WorkflowStep {
                    step_id: "S2".to_string(),
                    agent_id: agent_id.clone(),
                    function_name: "f2".to_string(),
                    dependencies: vec!["S1".to_string()],
                    parallel_allowed: true,
                    ..WorkflowStep::default()
                },
                WorkflowStep {
                    step_id: "S3".to_string(),
                    agent_id: agent_id.clone(),
                    function_name: "f3".to_string(),
                    dependencies: vec!["S1".to_string()],
                    parallel_allowed: true,
                    ..WorkflowStep::default()
                },
                WorkflowStep {
                    step_id: "S4".to_string(),
                    agent_id: agent_id.clone(),
                    function_name: "f4".to_string(),
                    dependencies: vec!["S2".to_string(), "S3".to_string()],
                    ..WorkflowStep::default()
                },
            ],
            ..OrchestratorWorkflow::default()
        };
        orchestrator.register_workflow(workflow).unwrap();

        let result = orchestrator
            .execute_workflow("dag", AgentData::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.step_results.len(), 4);

        let order = log.lock().unwrap().clone();
        assert_eq!(order.first().map(String::as_str), Some("S1"));
        assert_eq!(order.last().map(String::as_str), Some("S4"));
        // S2 and S3 overlapped in time.
        assert!(max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn circular_dependencies_are_detected() {
        let (manager, ids) = fleet(&["worker"]).await;
        let orchestrator = Arc::new(AgentOrchestrator::new(manager));

        let workflow = OrchestratorWorkflow {
            workflow_id: "cycle".to_string(),
            steps: vec![
                WorkflowStep {
                    step_id: "a".to_string(),
                    agent_id: ids[0].clone(),
                    function_name: "echo".to_string(),
                    dependencies: vec!["b".to_string()],
                    ..WorkflowStep::default()
                },
                WorkflowStep {
                    step_id: "b".to_string(),
                    agent_id: ids[0].clone(),
                    function_name: "echo".to_string(),
                    dependencies: vec!["a".to_string()],
                    ..WorkflowStep::default()
                },
            ],
            ..OrchestratorWorkflow::default()
        };
        orchestrator.register_workflow(workflow).unwrap();

        let result = orchestrator
            .execute_workflow("cycle", AgentData::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message.contains("Circular dependency"));
    }

    #[tokio::test]
    async fn failed_step_fails_the_workflow_and_blocks_dependents() {
        let (manager, ids) = fleet(&["worker"]).await;
        manager
            .get_agent(&ids[0])
            .unwrap()
            .registry()
            .register(FunctionEntry::new(
                "broken",
                "",
                AgentFunction::Native(Arc::new(|_| FunctionResult::fail("boom"))),
            ));

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        let workflow = OrchestratorWorkflow {
            workflow_id: "fail".to_string(),
            steps: vec![
                WorkflowStep {
                    step_id: "first".to_string(),
                    agent_id: ids[0].clone(),
                    function_name: "broken".to_string(),
                    ..WorkflowStep::default()
                },
                WorkflowStep {
                    step_id: "second".to_string(),
                    agent_id: ids[0].clone(),
                    function_name: "echo".to_string(),
                    dependencies: vec!["first".to_string()],
                    ..WorkflowStep::default()
                },
            ],
            ..OrchestratorWorkflow::default()
        };
        orchestrator.register_workflow(workflow).unwrap();

        let result = orchestrator
            .execute_workflow("fail", AgentData::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message.starts_with("Step first failed"));
        assert!(!result.step_results.contains_key("second"));

        let metrics = orchestrator.orchestration_metrics();
        assert_eq!(metrics["failed_workflows"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_execution_flows_through_the_worker() {
        let (manager, ids) = fleet(&["worker"]).await;
        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        orchestrator.start();

        let workflow = OrchestratorWorkflow {
            workflow_id: "bg".to_string(),
            steps: vec![WorkflowStep {
                step_id: "s".to_string(),
                agent_id: ids[0].clone(),
                function_name: "echo".to_string(),
                parameters: AgentData::new().with("message", "hi"),
                ..WorkflowStep::default()
            }],
            ..OrchestratorWorkflow::default()
        };
        orchestrator.register_workflow(workflow).unwrap();
        orchestrator
            .execute_workflow_async("bg", AgentData::new())
            .unwrap();

        let mut result = None;
        for _ in 0..200 {
            result = orchestrator.get_workflow_result("bg");
            if result.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(result.unwrap().success);

        assert!(orchestrator
            .execute_workflow_async("missing", AgentData::new())
            .is_err());
        assert_eq!(orchestrator.status(), "running");
        orchestrator.stop().await;
        assert_eq!(orchestrator.status(), "stopped");
    }

    fn register_process(manager: &AgentManager, agent_id: &str, suffix: &str) {
        let suffix = suffix.to_string();
        manager
            .get_agent(agent_id)
            .unwrap()
            .registry()
            .register(FunctionEntry::new(
                "process",
                "",
                AgentFunction::Native(Arc::new(move |params| {
                    let text = params.get_str_or("text", "").to_string();
                    let mut result = FunctionResult::ok();
                    result.result.set("text", format!("{text}{suffix}"));
                    result
                })),
            ));
    }

    #[tokio::test]
    async fn sequential_collaboration_threads_results() {
        let (manager, ids) = fleet(&["a", "b"]).await;
        register_process(&manager, &ids[0], "-first");
        register_process(&manager, &ids[1], "-second");

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        orchestrator
            .create_collaboration_group(CollaborationGroup::new(
                "g",
                CollaborationPattern::Sequential,
                ids.clone(),
            ))
            .unwrap();

        let result = orchestrator
            .execute_collaboration("g", AgentData::new().with("text", "x"))
            .await
            .unwrap();
        assert_eq!(result.get_str("text"), Some("x-first-second"));

        // Result is retained in the group's shared context.
        assert_eq!(
            orchestrator
                .collaboration_result("g")
                .unwrap()
                .get_str("text"),
            Some("x-first-second")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_collaboration_aggregates_success_count() {
        let (manager, ids) = fleet(&["a", "b"]).await;
        register_process(&manager, &ids[0], "-a");
        register_process(&manager, &ids[1], "-b");

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        orchestrator
            .create_collaboration_group(CollaborationGroup::new(
                "g",
                CollaborationPattern::Parallel,
                ids,
            ))
            .unwrap();

        let result = orchestrator
            .execute_collaboration("g", AgentData::new().with("text", "x"))
            .await
            .unwrap();
        assert_eq!(result.get_i64("success_count"), Some(2));
        assert!(result.get_object("result_0").is_some());
        assert!(result.get_object("result_1").is_some());
    }

    #[tokio::test]
    async fn consensus_carries_threshold_metadata() {
        let (manager, ids) = fleet(&["a"]).await;
        register_process(&manager, &ids[0], "-a");

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        let mut group = CollaborationGroup::new("g", CollaborationPattern::Consensus, ids);
        group.consensus_threshold = 0.75;
        orchestrator.create_collaboration_group(group).unwrap();

        let result = orchestrator
            .execute_collaboration("g", AgentData::new().with("text", "x"))
            .await
            .unwrap();
        assert_eq!(result.get_f64("consensus_threshold"), Some(0.75));
        assert_eq!(result.get_i64("success_count"), Some(1));
    }

    #[tokio::test]
    async fn hierarchy_uses_first_agent_as_master() {
        let (manager, ids) = fleet(&["master", "minion"]).await;
        manager
            .get_agent(&ids[0])
            .unwrap()
            .registry()
            .register(FunctionEntry::new(
                "coordinate",
                "",
                AgentFunction::Native(Arc::new(|_params| {
                    let mut result = FunctionResult::ok();
                    result.result.set("coordinated", true);
                    result
                })),
            ));

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        orchestrator
            .create_collaboration_group(CollaborationGroup::new(
                "g",
                CollaborationPattern::Hierarchy,
                ids,
            ))
            .unwrap();

        let result = orchestrator
            .execute_collaboration("g", AgentData::new())
            .await
            .unwrap();
        assert_eq!(result.get_bool("coordinated"), Some(true));
    }

    #[tokio::test]
    async fn negotiation_iterates_proposals() {
        let (manager, ids) = fleet(&["negotiator"]).await;
        let rounds_seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rounds_seen);
        manager
            .get_agent(&ids[0])
            .unwrap()
            .registry()
            .register(FunctionEntry::new(
                "negotiate",
                "",
                AgentFunction::Native(Arc::new(move |params| {
                    let round = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut result = FunctionResult::ok();
                    result.result = params.clone();
                    result.result.set("round", round);
                    result
                })),
            ));

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        let mut group = CollaborationGroup::new("g", CollaborationPattern::Negotiation, ids);
        group.max_negotiation_rounds = 3;
        orchestrator.create_collaboration_group(group).unwrap();

        let result = orchestrator
            .execute_collaboration("g", AgentData::new().with("offer", 1))
            .await
            .unwrap();
        assert_eq!(result.get_i64("round"), Some(3));
        assert_eq!(rounds_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn coordinate_agents_rejects_unknown_types() {
        let (manager, ids) = fleet(&["a"]).await;
        register_process(&manager, &ids[0], "-a");
        let orchestrator = Arc::new(AgentOrchestrator::new(manager));

        assert!(orchestrator
            .coordinate_agents(ids.clone(), "quantum", AgentData::new())
            .await
            .is_err());

        let result = orchestrator
            .coordinate_agents(ids, "sequential", AgentData::new().with("text", "x"))
            .await
            .unwrap();
        assert_eq!(result.get_str("text"), Some("x-a"));
        assert_eq!(orchestrator.list_collaboration_groups().len(), 1);
    }

    #[tokio::test]
    async fn pipelines_register_and_execute_under_their_name() {
        let (manager, ids) = fleet(&["a", "b"]).await;
        register_process(&manager, &ids[0], "-1");
        register_process(&manager, &ids[1], "-2");

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        orchestrator.setup_pipeline(ids, "etl").unwrap();

        let result = orchestrator
            .execute_pipeline("etl", AgentData::new().with("text", "in"))
            .await
            .unwrap();
        assert_eq!(result.get_str("text"), Some("in-1-2"));
    }

    #[tokio::test]
    async fn capability_based_selection_and_distribution() {
        let (manager, ids) = fleet(&["a", "b"]).await;
        manager.get_agent(&ids[0]).unwrap().add_capability("analysis");
        manager.get_agent(&ids[1]).unwrap().add_capability("analysis");

        let orchestrator = Arc::new(AgentOrchestrator::new(manager));
        let selected = orchestrator
            .select_optimal_agent("analysis", &AgentData::new())
            .unwrap();
        assert!(ids.contains(&selected));
        assert!(orchestrator
            .select_optimal_agent("nonexistent", &AgentData::new())
            .is_none());

        // Tasks are dispatched round-robin over the "analysis" capability
        // as echo-style invocations; unknown capability errors.
        let tasks = vec![AgentData::new(); 3];
        assert_eq!(orchestrator.distribute_workload("analysis", tasks).unwrap(), 3);
        assert!(orchestrator
            .distribute_workload("nonexistent", vec![AgentData::new()])
            .is_err());

        orchestrator.optimize_allocation();
    }

    #[test]
    fn pattern_parsing_round_trips() {
        for pattern in [
            CollaborationPattern::Sequential,
            CollaborationPattern::Parallel,
            CollaborationPattern::Pipeline,
            CollaborationPattern::Consensus,
            CollaborationPattern::Hierarchy,
            CollaborationPattern::Negotiation,
        ] {
            assert_eq!(
                pattern.as_str().parse::<CollaborationPattern>().unwrap(),
                pattern
            );
        }
        assert!("quantum".parse::<CollaborationPattern>().is_err());
    }
}
