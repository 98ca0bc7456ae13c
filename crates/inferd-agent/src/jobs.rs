//! Per-agent job queue with a single worker.
//!
//! Jobs drain in priority order (higher first), ties FIFO by submission.
//! The queue mutex is never held across a function invocation.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use inferd_core::data::{AgentData, FunctionResult};
use inferd_core::error::CoreError;
use inferd_core::job::{Job, JobStatus};

use crate::functions::FunctionRegistry;

/// Bounded wait when joining the worker at stop time.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Heap key: priority descending, then submission order ascending.
#[derive(Debug, PartialEq, Eq)]
struct QueuedJob {
    priority: i32,
    seq: u64,
    id: Uuid,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct JobState {
    queue: BinaryHeap<QueuedJob>,
    jobs: HashMap<Uuid, Job>,
}

/// Queue counters for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStats {
    /// Jobs ever submitted and still tracked.
    pub total: usize,
    /// Jobs waiting in the queue.
    pub queue_size: usize,
}

/// FIFO-with-priority job queue driving one worker task.
pub struct JobManager {
    registry: Arc<FunctionRegistry>,
    state: Mutex<JobState>,
    notify: Notify,
    running: AtomicBool,
    seq: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    #[must_use]
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(JobState::default()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.worker_loop().await;
        });
        *self.worker.lock().expect("worker lock poisoned") = Some(handle);
        tracing::info!("Job manager started");
    }

    /// Stop the worker and join it within a bounded wait. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_one();
        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await;
        }
        tracing::info!("Job manager stopped");
    }

    /// Enqueue a job and wake the worker.
    pub fn submit_job(
        &self,
        function_name: &str,
        parameters: AgentData,
        priority: i32,
        requester: &str,
    ) -> Uuid {
        let mut job = Job::new(function_name, parameters);
        job.priority = priority;
        job.requester = requester.to_string();
        let id = job.id;

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.queue.push(QueuedJob {
                priority,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                id,
            });
            state.jobs.insert(id, job);
        }
        self.notify.notify_one();

        tracing::debug!(job_id = %id, function = function_name, priority, "Job submitted");
        id
    }

    #[must_use]
    pub fn job_status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .jobs
            .get(&job_id)
            .map(|job| job.status)
    }

    #[must_use]
    pub fn job_result(&self, job_id: Uuid) -> Option<FunctionResult> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .jobs
            .get(&job_id)
            .and_then(|job| job.result.clone())
    }

    /// Cancel a job. Valid only while it is still pending.
    pub fn cancel_job(&self, job_id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.lock().expect("state lock poisoned");
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                tracing::info!(job_id = %job_id, "Job cancelled");
                Ok(())
            }
            Some(job) => Err(CoreError::Validation(format!(
                "job {job_id} is {} and cannot be cancelled",
                job.status.as_str()
            ))),
            None => Err(CoreError::NotFound(format!("job {job_id}"))),
        }
    }

    #[must_use]
    pub fn stats(&self) -> JobStats {
        let state = self.state.lock().expect("state lock poisoned");
        JobStats {
            total: state.jobs.len(),
            queue_size: state.queue.len(),
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let next = self.take_next();
            match next {
                Some((id, function_name, parameters)) => {
                    tracing::debug!(job_id = %id, "Processing job");
                    let result = self.registry.execute(&function_name, &parameters).await;

                    let mut state = self.state.lock().expect("state lock poisoned");
                    if let Some(job) = state.jobs.get_mut(&id) {
                        job.status = if result.success {
                            JobStatus::Completed
                        } else {
                            JobStatus::Failed
                        };
                        tracing::debug!(job_id = %id, status = job.status.as_str(), "Job finished");
                        job.result = Some(result);
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Pop the highest-priority pending job and mark it running. Cancelled
    /// entries are skipped.
    fn take_next(&self) -> Option<(Uuid, String, AgentData)> {
        let mut state = self.state.lock().expect("state lock poisoned");
        while let Some(queued) = state.queue.pop() {
            if let Some(job) = state.jobs.get_mut(&queued.id) {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Running;
                    return Some((job.id, job.function_name.clone(), job.parameters.clone()));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{AgentFunction, FunctionContext, FunctionEntry};

    fn manager_with_log() -> (Arc<JobManager>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(FunctionRegistry::new(FunctionContext::default()));

        let sink = Arc::clone(&log);
        registry.register(FunctionEntry::new(
            "record",
            "Records its tag",
            AgentFunction::Native(Arc::new(move |params| {
                let tag = params.get_str_or("tag", "?").to_string();
                sink.lock().unwrap().push(tag);
                FunctionResult::ok()
            })),
        ));
        registry.register(FunctionEntry::new(
            "always_fails",
            "",
            AgentFunction::Native(Arc::new(|_| FunctionResult::fail("nope"))),
        ));

        (Arc::new(JobManager::new(registry)), log)
    }

    async fn wait_until_terminal(manager: &JobManager, ids: &[Uuid]) {
        for _ in 0..200 {
            let done = ids
                .iter()
                .all(|id| manager.job_status(*id).is_some_and(JobStatus::is_terminal));
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("jobs did not reach a terminal state");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn priority_order_with_fifo_ties() {
        let (manager, log) = manager_with_log();

        // Submit before starting the worker so ordering is decided purely by
        // the queue: A(prio 0), B(prio 5), C(prio 5) must drain as B, C, A.
        let a = manager.submit_job("record", AgentData::new().with("tag", "A"), 0, "test");
        let b = manager.submit_job("record", AgentData::new().with("tag", "B"), 5, "test");
        let c = manager.submit_job("record", AgentData::new().with("tag", "C"), 5, "test");

        manager.start();
        wait_until_terminal(&manager, &[a, b, c]).await;

        assert_eq!(*log.lock().unwrap(), vec!["B", "C", "A"]);
        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_accounting_invariant_holds() {
        let (manager, _log) = manager_with_log();
        manager.start();

        let ok = manager.submit_job("record", AgentData::new().with("tag", "x"), 0, "t");
        let bad = manager.submit_job("always_fails", AgentData::new(), 0, "t");
        wait_until_terminal(&manager, &[ok, bad]).await;

        assert_eq!(manager.job_status(ok), Some(JobStatus::Completed));
        assert_eq!(manager.job_status(bad), Some(JobStatus::Failed));
        assert!(!manager.job_result(bad).unwrap().success);

        // Every submitted job is terminal, in-queue, or running.
        let stats = manager.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.queue_size, 0);

        manager.stop().await;
    }

    #[tokio::test]
    async fn cancel_applies_only_to_pending_jobs() {
        let (manager, log) = manager_with_log();

        let id = manager.submit_job("record", AgentData::new().with("tag", "X"), 0, "t");
        manager.cancel_job(id).unwrap();
        assert_eq!(manager.job_status(id), Some(JobStatus::Cancelled));

        // Second cancel is rejected, as is cancelling an unknown id.
        assert!(manager.cancel_job(id).is_err());
        assert!(matches!(
            manager.cancel_job(Uuid::new_v4()).unwrap_err(),
            CoreError::NotFound(_)
        ));

        // The worker skips the cancelled entry.
        manager.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(manager.job_status(id), Some(JobStatus::Cancelled));
        manager.stop().await;
    }

    #[tokio::test]
    async fn unknown_function_fails_the_job() {
        let (manager, _) = manager_with_log();
        manager.start();

        let id = manager.submit_job("no_such_function", AgentData::new(), 0, "t");
        wait_until_terminal(&manager, &[id]).await;
        assert_eq!(manager.job_status(id), Some(JobStatus::Failed));

        manager.stop().await;
    }
}
