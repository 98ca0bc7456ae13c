//! Per-request completion tracking and per-engine aggregation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

use inferd_core::metrics::{AggregatedMetrics, CompletionMetrics, CompletionRequestMetrics};

/// Tracks request lifecycles and folds terminal requests into per-engine
/// metrics. All operations are O(1) under the relevant mutex; the two locks
/// are never held at once except in `reset`.
#[derive(Default)]
pub struct CompletionMonitor {
    requests: Mutex<HashMap<String, CompletionRequestMetrics>>,
    engines: Mutex<HashMap<String, CompletionMetrics>>,
}

impl CompletionMonitor {
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("Completion monitor initialized");
        Self::default()
    }

    /// Begin tracking a request; returns its generated id.
    pub fn start_request(&self, model_name: &str, engine_id: &str) -> String {
        let request_id = generate_request_id();
        let request = CompletionRequestMetrics {
            request_id: request_id.clone(),
            model_name: model_name.to_string(),
            engine_id: engine_id.to_string(),
            request_start_ms: now_ms(),
            ..CompletionRequestMetrics::default()
        };
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .insert(request_id.clone(), request);

        tracing::debug!(request_id = %request_id, model_name, engine_id, "Started tracking completion request");
        request_id
    }

    pub fn record_input_tokens(&self, request_id: &str, count: u64) {
        let mut requests = self.requests.lock().expect("requests lock poisoned");
        if let Some(request) = requests.get_mut(request_id) {
            request.input_tokens = count;
        }
    }

    /// Idempotent: only the first call stamps the timestamp.
    pub fn record_first_token(&self, request_id: &str) {
        let mut requests = self.requests.lock().expect("requests lock poisoned");
        if let Some(request) = requests.get_mut(request_id) {
            if request.first_token_ms.is_none() {
                request.first_token_ms = Some(now_ms());
            }
        }
    }

    /// Count one output token; the first one also stamps the TTFT timestamp.
    pub fn record_output_token(&self, request_id: &str) {
        let mut requests = self.requests.lock().expect("requests lock poisoned");
        if let Some(request) = requests.get_mut(request_id) {
            request.output_tokens += 1;
            if request.first_token_ms.is_none() {
                request.first_token_ms = Some(now_ms());
            }
        }
    }

    pub fn complete_request(&self, request_id: &str) {
        self.finish_request(request_id, now_ms(), true);
    }

    pub fn fail_request(&self, request_id: &str) {
        self.finish_request(request_id, now_ms(), false);
    }

    fn finish_request(&self, request_id: &str, completion_ms: i64, completed: bool) {
        let request = {
            let mut requests = self.requests.lock().expect("requests lock poisoned");
            let Some(request) = requests.get_mut(request_id) else {
                return;
            };
            request.completed = completed;
            request.failed = !completed;
            request.completion_ms = Some(completion_ms);
            request.clone()
        };

        if completed {
            tracing::debug!(
                request_id,
                input_tokens = request.input_tokens,
                output_tokens = request.output_tokens,
                turnaround_ms = request.turnaround_ms(),
                "Completed request"
            );
        } else {
            tracing::warn!(request_id, turnaround_ms = request.turnaround_ms(), "Failed request");
        }

        self.engines
            .lock()
            .expect("engines lock poisoned")
            .entry(request.engine_id.clone())
            .or_insert_with(|| CompletionMetrics::for_engine(&request.engine_id))
            .record(&request);
    }

    /// Aggregate across engines with completion-count-weighted averages.
    pub fn completion_metrics(&self) -> AggregatedMetrics {
        let engines = self.engines.lock().expect("engines lock poisoned");
        AggregatedMetrics::from_engines(engines.values())
    }

    pub fn metrics_for_engine(&self, engine_id: &str) -> CompletionMetrics {
        self.engines
            .lock()
            .expect("engines lock poisoned")
            .get(engine_id)
            .cloned()
            .unwrap_or_else(|| CompletionMetrics::for_engine(engine_id))
    }

    pub fn active_engine_ids(&self) -> Vec<String> {
        self.engines
            .lock()
            .expect("engines lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        self.engines.lock().expect("engines lock poisoned").clear();
        self.requests.lock().expect("requests lock poisoned").clear();
        tracing::info!("Reset all completion metrics");
    }

    pub fn reset_engine(&self, engine_id: &str) {
        self.engines
            .lock()
            .expect("engines lock poisoned")
            .remove(engine_id);
        tracing::info!(engine_id, "Reset completion metrics for engine");
    }

    /// Purge terminal request entries older than the cutoff.
    pub fn cleanup_old_requests(&self, max_age_seconds: i64) {
        let cutoff = now_ms() - max_age_seconds * 1000;
        let mut requests = self.requests.lock().expect("requests lock poisoned");
        requests.retain(|_, request| {
            let terminal = request.completed || request.failed;
            !(terminal && request.completion_ms.is_some_and(|end| end < cutoff))
        });
    }

    #[cfg(test)]
    fn adjust_request(&self, request_id: &str, f: impl FnOnce(&mut CompletionRequestMetrics)) {
        let mut requests = self.requests.lock().expect("requests lock poisoned");
        f(requests.get_mut(request_id).expect("unknown request"));
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn generate_request_id() -> String {
    let suffix: u32 = rand::rng().random_range(100_000..=999_999);
    format!("req_{}_{suffix}", now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert!(a.starts_with("req_"));
        assert_ne!(a, b);
    }

    #[test]
    fn single_request_produces_contract_metrics() {
        let monitor = CompletionMonitor::new();
        let id = monitor.start_request("model-a", "e1");

        monitor.record_input_tokens(&id, 10);
        monitor.record_first_token(&id);
        for _ in 0..20 {
            monitor.record_output_token(&id);
        }

        // Pin timestamps so the math is exact: first token at +100 ms,
        // completion at +1000 ms.
        monitor.adjust_request(&id, |req| {
            req.request_start_ms = 0;
            req.first_token_ms = Some(100);
        });
        monitor.finish_request(&id, 1000, true);

        let metrics = monitor.metrics_for_engine("e1");
        assert_eq!(metrics.completed_requests, 1);
        assert_eq!(metrics.total_input_tokens, 10);
        assert_eq!(metrics.total_output_tokens, 20);
        assert!((metrics.tps - 30.0).abs() < 1e-9);
        assert!((metrics.output_tps - 20.0 / 0.9).abs() < 1e-9);
        assert!((metrics.avg_ttft_ms - 100.0).abs() < 1e-9);
        assert!((metrics.rps - 1.0).abs() < 1e-9);
    }

    #[test]
    fn first_token_stamp_is_idempotent() {
        let monitor = CompletionMonitor::new();
        let id = monitor.start_request("m", "e1");

        monitor.record_first_token(&id);
        monitor.adjust_request(&id, |req| req.first_token_ms = Some(42));
        // Further stamps (explicit or via output tokens) must not overwrite.
        monitor.record_first_token(&id);
        monitor.record_output_token(&id);
        monitor.adjust_request(&id, |req| {
            assert_eq!(req.first_token_ms, Some(42));
        });
    }

    #[test]
    fn aggregate_sums_per_engine_completions() {
        let monitor = CompletionMonitor::new();
        for engine in ["e1", "e1", "e2"] {
            let id = monitor.start_request("m", engine);
            monitor.record_output_token(&id);
            monitor.adjust_request(&id, |req| {
                req.request_start_ms = 0;
                req.first_token_ms = Some(10);
            });
            monitor.finish_request(&id, 100, true);
        }

        let agg = monitor.completion_metrics();
        assert_eq!(agg.completed_requests, 3);
        assert_eq!(
            agg.completed_requests,
            agg.per_engine
                .iter()
                .map(|m| m.completed_requests)
                .sum::<u64>()
        );
        assert_eq!(agg.per_engine.len(), 2);
    }

    #[test]
    fn failed_requests_count_separately() {
        let monitor = CompletionMonitor::new();
        let id = monitor.start_request("m", "e1");
        monitor.fail_request(&id);

        let metrics = monitor.metrics_for_engine("e1");
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.completed_requests, 0);
    }

    #[test]
    fn cleanup_purges_only_old_terminal_requests() {
        let monitor = CompletionMonitor::new();
        let old = monitor.start_request("m", "e1");
        monitor.finish_request(&old, now_ms() - 120_000, true);
        let live = monitor.start_request("m", "e1");

        monitor.cleanup_old_requests(60);

        let requests = monitor.requests.lock().unwrap();
        assert!(!requests.contains_key(&old));
        assert!(requests.contains_key(&live));
    }

    #[test]
    fn reset_engine_clears_one_engine_only() {
        let monitor = CompletionMonitor::new();
        for engine in ["e1", "e2"] {
            let id = monitor.start_request("m", engine);
            monitor.finish_request(&id, now_ms(), true);
        }

        monitor.reset_engine("e1");
        let mut ids = monitor.active_engine_ids();
        ids.sort();
        assert_eq!(ids, vec!["e2"]);

        monitor.reset();
        assert!(monitor.active_engine_ids().is_empty());
    }

    #[test]
    fn unknown_request_ids_are_ignored() {
        let monitor = CompletionMonitor::new();
        monitor.record_input_tokens("nope", 5);
        monitor.record_output_token("nope");
        monitor.complete_request("nope");
        assert!(monitor.active_engine_ids().is_empty());
    }
}
