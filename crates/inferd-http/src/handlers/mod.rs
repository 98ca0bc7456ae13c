//! HTTP request handlers, grouped by surface.

pub mod agents;
pub mod auto_setup;
pub mod completions;
pub mod engines;
pub mod metrics;
pub mod orchestration;
pub mod workflows;
