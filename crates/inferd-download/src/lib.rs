//! Download manager for model acquisition.
//!
//! Tracks one progress record per model id, streams bytes to disk with
//! HTTP range-resume, and supports cooperative cancellation at chunk
//! boundaries. A download that carries an engine spec hands the finished
//! file to the engine registry through the `EngineDeployer` port.
//!
//! # Concurrency Model
//!
//! - One spawned task per active download
//! - `CancellationToken` per task, observed between streamed chunks
//! - All progress mutation under the manager's single mutex; the mutex is
//!   never held across network I/O

mod manager;
mod paths;

pub use manager::DownloadManager;
pub use paths::{derive_local_path, is_url};
