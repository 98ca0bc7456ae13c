//! Completion metrics domain types.
//!
//! The derived-metric formulas here are the contract:
//! `tps = (in + out tokens) / turnaround_s`, `output_tps = out / output_gen_s`,
//! `avg_ttft = Σttft / completed`, `rps = completed / turnaround_s`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Per-request lifecycle measurements, all timestamps in epoch milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequestMetrics {
    pub request_id: String,
    pub model_name: String,
    pub engine_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_ms: Option<i64>,
    pub completed: bool,
    pub failed: bool,
}

impl CompletionRequestMetrics {
    /// Request start to completion, in milliseconds. Zero until terminal.
    #[must_use]
    pub fn turnaround_ms(&self) -> f64 {
        match self.completion_ms {
            #[allow(clippy::cast_precision_loss)]
            Some(end) if end > self.request_start_ms => (end - self.request_start_ms) as f64,
            _ => 0.0,
        }
    }

    /// Request start to the first observed output token, in milliseconds.
    #[must_use]
    pub fn ttft_ms(&self) -> f64 {
        match self.first_token_ms {
            #[allow(clippy::cast_precision_loss)]
            Some(first) if first > self.request_start_ms => (first - self.request_start_ms) as f64,
            _ => 0.0,
        }
    }

    /// First token to completion, in milliseconds.
    #[must_use]
    pub fn output_generation_ms(&self) -> f64 {
        match (self.first_token_ms, self.completion_ms) {
            #[allow(clippy::cast_precision_loss)]
            (Some(first), Some(end)) if end > first => (end - first) as f64,
            _ => 0.0,
        }
    }
}

/// Accumulated metrics for one engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionMetrics {
    pub model_name: String,
    pub engine_id: String,
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_turnaround_ms: f64,
    pub total_ttft_ms: f64,
    pub total_output_generation_ms: f64,
    pub tps: f64,
    pub output_tps: f64,
    pub avg_ttft_ms: f64,
    pub rps: f64,
    pub last_updated: String,
}

impl CompletionMetrics {
    #[must_use]
    pub fn for_engine(engine_id: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            last_updated: now_rfc3339(),
            ..Self::default()
        }
    }

    /// Fold one terminal request into the counters and refresh derived fields.
    pub fn record(&mut self, request: &CompletionRequestMetrics) {
        self.model_name.clone_from(&request.model_name);
        self.engine_id.clone_from(&request.engine_id);
        self.total_requests += 1;

        if request.completed {
            self.completed_requests += 1;
            self.total_input_tokens += request.input_tokens;
            self.total_output_tokens += request.output_tokens;
            self.total_turnaround_ms += request.turnaround_ms();
            self.total_ttft_ms += request.ttft_ms();
            self.total_output_generation_ms += request.output_generation_ms();
            self.recalculate();
        } else if request.failed {
            self.failed_requests += 1;
        }
        self.last_updated = now_rfc3339();
    }

    /// Recompute the derived fields from the accumulated totals.
    #[allow(clippy::cast_precision_loss)]
    pub fn recalculate(&mut self) {
        if self.completed_requests > 0 && self.total_turnaround_ms > 0.0 {
            let turnaround_s = self.total_turnaround_ms / 1000.0;
            self.tps =
                (self.total_input_tokens + self.total_output_tokens) as f64 / turnaround_s;
            if self.total_output_generation_ms > 0.0 {
                self.output_tps =
                    self.total_output_tokens as f64 / (self.total_output_generation_ms / 1000.0);
            }
            self.avg_ttft_ms = self.total_ttft_ms / self.completed_requests as f64;
            self.rps = self.completed_requests as f64 / turnaround_s;
        } else {
            self.tps = 0.0;
            self.output_tps = 0.0;
            self.avg_ttft_ms = 0.0;
            self.rps = 0.0;
        }
    }
}

/// Fleet-wide aggregate with completion-count-weighted averages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub timestamp: String,
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_turnaround_ms: f64,
    pub total_ttft_ms: f64,
    pub total_output_generation_ms: f64,
    pub avg_tps: f64,
    pub avg_output_tps: f64,
    pub avg_ttft_ms: f64,
    pub avg_rps: f64,
    pub per_engine: Vec<CompletionMetrics>,
}

impl AggregatedMetrics {
    /// Sum counters over engines; average the derived rates weighted by each
    /// engine's completed-request count.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_engines<'a>(engines: impl IntoIterator<Item = &'a CompletionMetrics>) -> Self {
        let mut aggregated = Self {
            timestamp: now_rfc3339(),
            ..Self::default()
        };

        let mut weighted_tps = 0.0;
        let mut weighted_output_tps = 0.0;
        let mut weighted_ttft = 0.0;
        let mut weighted_rps = 0.0;
        let mut completed_for_avg = 0u64;

        for metrics in engines {
            aggregated.per_engine.push(metrics.clone());
            aggregated.total_requests += metrics.total_requests;
            aggregated.completed_requests += metrics.completed_requests;
            aggregated.failed_requests += metrics.failed_requests;
            aggregated.total_input_tokens += metrics.total_input_tokens;
            aggregated.total_output_tokens += metrics.total_output_tokens;
            aggregated.total_turnaround_ms += metrics.total_turnaround_ms;
            aggregated.total_ttft_ms += metrics.total_ttft_ms;
            aggregated.total_output_generation_ms += metrics.total_output_generation_ms;

            if metrics.completed_requests > 0 {
                let weight = metrics.completed_requests as f64;
                weighted_tps += metrics.tps * weight;
                weighted_output_tps += metrics.output_tps * weight;
                weighted_ttft += metrics.avg_ttft_ms * weight;
                weighted_rps += metrics.rps * weight;
                completed_for_avg += metrics.completed_requests;
            }
        }

        if completed_for_avg > 0 {
            let divisor = completed_for_avg as f64;
            aggregated.avg_tps = weighted_tps / divisor;
            aggregated.avg_output_tps = weighted_output_tps / divisor;
            aggregated.avg_ttft_ms = weighted_ttft / divisor;
            aggregated.avg_rps = weighted_rps / divisor;
        }

        aggregated
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
