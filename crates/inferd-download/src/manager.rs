//! Download manager implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use inferd_core::download::{DownloadProgress, DownloadStatus, EngineCreationSpec};
use inferd_core::error::{CoreError, DownloadError};
use inferd_core::ports::EngineDeployer;

use crate::paths::{derive_local_path, is_url};

/// How a transfer should proceed given the local file and remote metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferPlan {
    /// No usable partial file; download from byte zero.
    Fresh,
    /// Partial file present and the server accepts ranges.
    Resume { offset: u64 },
    /// Local file already matches the remote size.
    AlreadyComplete { size: u64 },
}

fn plan_transfer(
    local_size: Option<u64>,
    remote_size: Option<u64>,
    accepts_ranges: bool,
) -> TransferPlan {
    match (local_size, remote_size) {
        (Some(local), Some(remote)) if local == remote && local > 0 => {
            TransferPlan::AlreadyComplete { size: local }
        }
        (Some(local), Some(remote)) if accepts_ranges && local < remote && local > 0 => {
            TransferPlan::Resume { offset: local }
        }
        _ => TransferPlan::Fresh,
    }
}

/// State for one tracked download.
struct Entry {
    progress: DownloadProgress,
    cancel: CancellationToken,
    engine: Option<EngineCreationSpec>,
}

/// Concurrent, resumable downloads keyed by model id.
pub struct DownloadManager {
    client: reqwest::Client,
    models_dir: PathBuf,
    /// Progress registry. Never held across network I/O.
    downloads: Mutex<HashMap<String, Entry>>,
    /// Join handles for active download tasks, consumed by `wait_for_all`.
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Engine registry, set after construction to break the ownership cycle.
    deployer: std::sync::Mutex<Option<Weak<dyn EngineDeployer>>>,
}

impl DownloadManager {
    #[must_use]
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            models_dir: models_dir.into(),
            downloads: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            deployer: std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Wire the engine registry in after both sides exist. Held weakly so the
    /// registry's ownership of this manager does not form a cycle.
    pub fn set_engine_deployer(&self, deployer: &Arc<dyn EngineDeployer>) {
        *self.deployer.lock().expect("deployer lock poisoned") = Some(Arc::downgrade(deployer));
    }

    fn deployer(&self) -> Option<Arc<dyn EngineDeployer>> {
        self.deployer
            .lock()
            .expect("deployer lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Default local destination for a URL under this manager's models dir.
    #[must_use]
    pub fn local_path_for(&self, url: &str) -> PathBuf {
        derive_local_path(url, &self.models_dir)
    }

    /// Start tracking and transferring a model.
    ///
    /// Rejects when an entry for `model_id` already exists.
    pub async fn start_download(
        self: &Arc<Self>,
        model_id: &str,
        url: &str,
        local_path: Option<PathBuf>,
    ) -> Result<(), DownloadError> {
        self.begin(model_id, url, local_path, None).await
    }

    /// Same as [`Self::start_download`], additionally deploying an engine from
    /// the finished file.
    pub async fn start_download_with_engine(
        self: &Arc<Self>,
        model_id: &str,
        url: &str,
        spec: EngineCreationSpec,
    ) -> Result<(), DownloadError> {
        self.begin(model_id, url, None, Some(spec)).await
    }

    async fn begin(
        self: &Arc<Self>,
        model_id: &str,
        url: &str,
        local_path: Option<PathBuf>,
        engine: Option<EngineCreationSpec>,
    ) -> Result<(), DownloadError> {
        if !is_url(url) {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }

        let path = local_path.unwrap_or_else(|| self.local_path_for(url));
        let cancel = CancellationToken::new();

        {
            let mut downloads = self.downloads.lock().await;
            if downloads.contains_key(model_id) {
                tracing::warn!(model_id, "Download already in progress");
                return Err(DownloadError::AlreadyActive(model_id.to_string()));
            }
            downloads.insert(
                model_id.to_string(),
                Entry {
                    progress: DownloadProgress::new(model_id, url, path.clone()),
                    cancel: cancel.clone(),
                    engine,
                },
            );
        }

        let manager = Arc::clone(self);
        let task_id = model_id.to_string();
        let task_url = url.to_string();
        let handle = tokio::spawn(async move {
            manager.run_download(task_id, task_url, path, cancel).await;
        });
        self.handles.lock().await.insert(model_id.to_string(), handle);

        tracing::info!(model_id, url, "Started download");
        Ok(())
    }

    async fn run_download(
        self: Arc<Self>,
        model_id: String,
        url: String,
        path: PathBuf,
        cancel: CancellationToken,
    ) {
        let result = self.perform_transfer(&model_id, &url, &path, &cancel).await;

        let engine = match result {
            Ok(total) => {
                let mut downloads = self.downloads.lock().await;
                let Some(entry) = downloads.get_mut(&model_id) else {
                    return;
                };
                if entry.progress.status == DownloadStatus::Downloading {
                    entry.progress.status = DownloadStatus::Completed;
                    entry.progress.downloaded_bytes = total;
                    entry.progress.total_bytes = total;
                    entry.progress.percentage = 100.0;
                    tracing::info!(model_id, total, "Download completed");
                    entry.engine.clone()
                } else {
                    // Cancelled while the last chunk was in flight.
                    entry.progress.ended_at = Some(Utc::now());
                    None
                }
            }
            Err(DownloadError::Cancelled) => {
                let mut downloads = self.downloads.lock().await;
                if let Some(entry) = downloads.get_mut(&model_id) {
                    entry.progress.status = DownloadStatus::Cancelled;
                    entry.progress.ended_at = Some(Utc::now());
                }
                tracing::info!(model_id, "Download cancelled");
                None
            }
            Err(err) => {
                let mut downloads = self.downloads.lock().await;
                if let Some(entry) = downloads.get_mut(&model_id) {
                    if entry.progress.status != DownloadStatus::Cancelled {
                        entry.progress.status = DownloadStatus::Failed;
                        entry.progress.error = Some(err.to_string());
                    }
                    entry.progress.ended_at = Some(Utc::now());
                }
                tracing::warn!(model_id, error = %err, "Download failed");
                None
            }
        };

        if let Some(spec) = engine {
            self.create_engine_after_download(&model_id, &spec, &path).await;
        } else {
            let mut downloads = self.downloads.lock().await;
            if let Some(entry) = downloads.get_mut(&model_id) {
                if entry.progress.ended_at.is_none() {
                    entry.progress.ended_at = Some(Utc::now());
                }
            }
        }
    }

    async fn create_engine_after_download(
        &self,
        model_id: &str,
        spec: &EngineCreationSpec,
        path: &Path,
    ) {
        {
            let mut downloads = self.downloads.lock().await;
            if let Some(entry) = downloads.get_mut(model_id) {
                entry.progress.status = DownloadStatus::CreatingEngine;
            }
        }
        tracing::info!(model_id, engine_id = %spec.engine_id, "Creating engine from download");

        let outcome = match self.deployer() {
            Some(deployer) => deployer.deploy(spec, path).await,
            None => Err(CoreError::Internal(
                "no engine deployer configured".to_string(),
            )),
        };

        let mut downloads = self.downloads.lock().await;
        if let Some(entry) = downloads.get_mut(model_id) {
            match outcome {
                Ok(()) => {
                    entry.progress.status = DownloadStatus::EngineCreated;
                    tracing::info!(model_id, engine_id = %spec.engine_id, "Engine created");
                }
                Err(err) => {
                    entry.progress.status = DownloadStatus::EngineCreationFailed;
                    entry.progress.error = Some(err.to_string());
                    tracing::error!(model_id, error = %err, "Engine creation failed");
                }
            }
            entry.progress.ended_at = Some(Utc::now());
        }
    }

    /// Stream the URL to disk, resuming a partial file when the server
    /// allows it. Returns the final byte count on success.
    async fn perform_transfer(
        &self,
        model_id: &str,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let local_size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
        let plan = if local_size.is_some() {
            let (remote_size, accepts_ranges) =
                self.probe(url).await.unwrap_or((None, false));
            plan_transfer(local_size, remote_size, accepts_ranges)
        } else {
            TransferPlan::Fresh
        };

        let mut offset = match plan {
            TransferPlan::AlreadyComplete { size } => {
                tracing::info!(model_id, size, "Local file already complete, skipping transfer");
                return Ok(size);
            }
            TransferPlan::Resume { offset } => {
                tracing::info!(model_id, offset, "Resuming partial download");
                offset
            }
            TransferPlan::Fresh => 0,
        };

        let mut response = self.fetch(url, offset).await?;
        if offset > 0 && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            tracing::warn!(model_id, "Server ignored range request, restarting from zero");
            offset = 0;
            response = self.fetch(url, 0).await?;
        }
        if !response.status().is_success() {
            return Err(DownloadError::Http(format!("HTTP {}", response.status())));
        }

        self.stream_to_file(model_id, response, path, offset, cancel)
            .await
    }

    async fn fetch(&self, url: &str, offset: u64) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        request
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))
    }

    async fn stream_to_file(
        &self,
        model_id: &str,
        response: reqwest::Response,
        path: &Path,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let total = response.content_length().map_or(0, |len| offset + len);

        let mut file = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(path).await?
        } else {
            tokio::fs::File::create(path).await?
        };

        let mut downloaded = offset;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk.map_err(|e| DownloadError::Http(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.update_progress(model_id, downloaded, total).await;
        }
        file.flush().await?;

        Ok(downloaded)
    }

    async fn update_progress(&self, model_id: &str, downloaded: u64, total: u64) {
        let mut downloads = self.downloads.lock().await;
        if let Some(entry) = downloads.get_mut(model_id) {
            entry.progress.downloaded_bytes = downloaded;
            entry.progress.total_bytes = total;
            #[allow(clippy::cast_precision_loss)]
            if total > 0 {
                entry.progress.percentage = downloaded as f64 / total as f64 * 100.0;
            }
        }
    }

    /// HEAD the URL: `(content_length, accepts_ranges)`.
    async fn probe(&self, url: &str) -> Result<(Option<u64>, bool), DownloadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::Http(format!("HTTP {}", response.status())));
        }

        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let ranges = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));

        Ok((length, ranges))
    }

    /// Whether a reachable URL serves this model (used by path validation).
    pub async fn probe_url(&self, url: &str) -> Result<u64, DownloadError> {
        let (length, _) = self.probe(url).await?;
        Ok(length.unwrap_or(0))
    }

    /// Snapshot of one download's progress.
    pub async fn progress(&self, model_id: &str) -> Option<DownloadProgress> {
        self.downloads
            .lock()
            .await
            .get(model_id)
            .map(|entry| entry.progress.clone())
    }

    pub async fn is_download_active(&self, model_id: &str) -> bool {
        self.downloads
            .lock()
            .await
            .get(model_id)
            .is_some_and(|entry| entry.progress.status == DownloadStatus::Downloading)
    }

    /// All entries currently in the `Downloading` state.
    pub async fn active_downloads(&self) -> Vec<DownloadProgress> {
        self.downloads
            .lock()
            .await
            .values()
            .filter(|entry| entry.progress.status == DownloadStatus::Downloading)
            .map(|entry| entry.progress.clone())
            .collect()
    }

    /// Flip the cancellation flag for one download. The task observes it at
    /// the next chunk boundary.
    pub async fn cancel_download(&self, model_id: &str) -> bool {
        let mut downloads = self.downloads.lock().await;
        let Some(entry) = downloads.get_mut(model_id) else {
            return false;
        };
        if entry.progress.status.is_terminal() {
            return false;
        }
        entry.progress.status = DownloadStatus::Cancelled;
        entry.progress.ended_at = Some(Utc::now());
        entry.cancel.cancel();
        tracing::info!(model_id, "Cancelled download");
        true
    }

    /// Cancel every non-terminal download; returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut downloads = self.downloads.lock().await;
        let mut cancelled = 0;
        for (model_id, entry) in downloads.iter_mut() {
            if !entry.progress.status.is_terminal() {
                entry.progress.status = DownloadStatus::Cancelled;
                entry.progress.ended_at = Some(Utc::now());
                entry.cancel.cancel();
                cancelled += 1;
                tracing::info!(model_id = %model_id, "Cancelled download");
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled all active downloads");
        }
        cancelled
    }

    /// Cancel everything, then join download tasks with a bounded wait:
    /// 10 s each for the first two joins, 3 s for the rest. Never blocks
    /// shutdown indefinitely.
    pub async fn wait_for_all(&self) {
        let cancelled = self.cancel_all().await;
        if cancelled > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let handles: Vec<(String, JoinHandle<()>)> =
            self.handles.lock().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        let total = handles.len();
        let mut completed = 0usize;
        for (model_id, handle) in handles {
            let timeout = Duration::from_secs(if completed < 2 { 10 } else { 3 });
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => {
                    completed += 1;
                    tracing::info!(model_id, completed, total, "Download task joined");
                }
                Err(_) => {
                    tracing::warn!(
                        model_id,
                        timeout_s = timeout.as_secs(),
                        "Download task did not finish within timeout, abandoning"
                    );
                }
            }
        }
    }

    /// Drop terminal entries whose end time is older than the cutoff.
    pub async fn cleanup_old(&self, minutes: i64) {
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        let mut downloads = self.downloads.lock().await;
        let mut handles = self.handles.lock().await;
        downloads.retain(|model_id, entry| {
            let expired = entry.progress.status.is_terminal()
                && entry.progress.ended_at.is_some_and(|end| end < cutoff);
            if expired {
                tracing::info!(model_id = %model_id, "Cleaning up old download record");
                handles.remove(model_id);
            }
            !expired
        });
    }

    /// Download a URL and wait for the transfer to finish, returning the
    /// local path. Used by the engine registry to resolve URL model paths
    /// before loading; progress remains observable through the registry
    /// while the caller waits. A previous terminal entry for the same id is
    /// replaced.
    pub async fn download_and_wait(
        self: &Arc<Self>,
        model_id: &str,
        url: &str,
    ) -> Result<PathBuf, DownloadError> {
        {
            let mut downloads = self.downloads.lock().await;
            if let Some(entry) = downloads.get(model_id) {
                if entry.progress.status.is_terminal() {
                    downloads.remove(model_id);
                } else {
                    return Err(DownloadError::AlreadyActive(model_id.to_string()));
                }
            }
        }

        let path = self.local_path_for(url);
        self.begin(model_id, url, Some(path.clone()), None).await?;

        let handle = self.handles.lock().await.remove(model_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let progress = self.progress(model_id).await;
        match progress.as_ref().map(|p| p.status) {
            Some(DownloadStatus::Completed) => Ok(path),
            Some(DownloadStatus::Cancelled) => Err(DownloadError::Cancelled),
            _ => Err(DownloadError::Http(
                progress
                    .and_then(|p| p.error)
                    .unwrap_or_else(|| "download did not complete".to_string()),
            )),
        }
    }

    /// Boot-time model acquisition: local paths deploy directly, complete
    /// local copies of URLs deploy directly, everything else downloads
    /// (resuming partial files) and deploys on completion.
    pub async fn load_model_at_startup(
        self: &Arc<Self>,
        model_id: &str,
        model_path: &str,
        spec: EngineCreationSpec,
    ) -> Result<(), CoreError> {
        if !is_url(model_path) {
            let deployer = self
                .deployer()
                .ok_or_else(|| CoreError::Internal("no engine deployer configured".to_string()))?;
            return deployer.deploy(&spec, Path::new(model_path)).await;
        }

        let local = self.local_path_for(model_path);
        if let Ok(meta) = std::fs::metadata(&local) {
            let (remote_size, accepts_ranges) =
                self.probe(model_path).await.unwrap_or((None, false));
            if let TransferPlan::AlreadyComplete { .. } =
                plan_transfer(Some(meta.len()), remote_size, accepts_ranges)
            {
                tracing::info!(model_id, path = %local.display(), "Model already downloaded");
                let deployer = self.deployer().ok_or_else(|| {
                    CoreError::Internal("no engine deployer configured".to_string())
                })?;
                return deployer.deploy(&spec, &local).await;
            }
        }

        self.start_download_with_engine(model_id, model_path, spec)
            .await
            .map_err(CoreError::from)
    }

    #[cfg(test)]
    async fn inject_entry(&self, progress: DownloadProgress) {
        self.downloads.lock().await.insert(
            progress.model_id.clone(),
            Entry {
                progress,
                cancel: CancellationToken::new(),
                engine: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prefers_resume_when_ranges_supported() {
        assert_eq!(plan_transfer(None, Some(100), true), TransferPlan::Fresh);
        assert_eq!(
            plan_transfer(Some(40), Some(100), true),
            TransferPlan::Resume { offset: 40 }
        );
        assert_eq!(
            plan_transfer(Some(100), Some(100), true),
            TransferPlan::AlreadyComplete { size: 100 }
        );
    }

    #[test]
    fn plan_restarts_without_range_support_or_size() {
        // Server refuses ranges: partial file is useless.
        assert_eq!(plan_transfer(Some(40), Some(100), false), TransferPlan::Fresh);
        // Unknown remote size: cannot trust the partial file.
        assert_eq!(plan_transfer(Some(40), None, true), TransferPlan::Fresh);
        // Corrupt oversized partial restarts from zero.
        assert_eq!(plan_transfer(Some(150), Some(100), true), TransferPlan::Fresh);
        // Zero-byte partial is not worth resuming.
        assert_eq!(plan_transfer(Some(0), Some(100), true), TransferPlan::Fresh);
    }

    #[tokio::test]
    async fn duplicate_model_id_is_rejected() {
        let manager = Arc::new(DownloadManager::new("./models-test"));
        manager
            .inject_entry(DownloadProgress::new(
                "m1",
                "http://127.0.0.1:9/m.gguf",
                "./models-test/m.gguf",
            ))
            .await;

        let err = manager
            .start_download("m1", "http://127.0.0.1:9/m.gguf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::AlreadyActive(_)));
    }

    #[tokio::test]
    async fn non_url_paths_are_rejected() {
        let manager = Arc::new(DownloadManager::new("./models-test"));
        let err = manager
            .start_download("m1", "./local/file.gguf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn cancel_flips_status_and_token() {
        let manager = DownloadManager::new("./models-test");
        manager
            .inject_entry(DownloadProgress::new("m1", "http://h/x.gguf", "x.gguf"))
            .await;

        assert!(manager.is_download_active("m1").await);
        assert!(manager.cancel_download("m1").await);

        let progress = manager.progress("m1").await.unwrap();
        assert_eq!(progress.status, DownloadStatus::Cancelled);
        assert!(progress.ended_at.is_some());

        // Terminal entries cannot be cancelled again.
        assert!(!manager.cancel_download("m1").await);
        assert!(!manager.cancel_download("missing").await);
    }

    #[tokio::test]
    async fn cancel_all_skips_terminal_entries() {
        let manager = DownloadManager::new("./models-test");
        manager
            .inject_entry(DownloadProgress::new("a", "http://h/a", "a"))
            .await;
        let mut done = DownloadProgress::new("b", "http://h/b", "b");
        done.status = DownloadStatus::Completed;
        manager.inject_entry(done).await;

        assert_eq!(manager.cancel_all().await, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_entries() {
        let manager = DownloadManager::new("./models-test");

        let mut old = DownloadProgress::new("old", "http://h/old", "old");
        old.status = DownloadStatus::Failed;
        old.ended_at = Some(Utc::now() - chrono::Duration::minutes(90));
        manager.inject_entry(old).await;

        let mut recent = DownloadProgress::new("recent", "http://h/r", "r");
        recent.status = DownloadStatus::Completed;
        recent.ended_at = Some(Utc::now());
        manager.inject_entry(recent).await;

        manager
            .inject_entry(DownloadProgress::new("live", "http://h/l", "l"))
            .await;

        manager.cleanup_old(60).await;

        assert!(manager.progress("old").await.is_none());
        assert!(manager.progress("recent").await.is_some());
        assert!(manager.progress("live").await.is_some());
    }

    #[tokio::test]
    async fn wait_for_all_returns_quickly_with_no_tasks() {
        let manager = DownloadManager::new("./models-test");
        let started = std::time::Instant::now();
        manager.wait_for_all().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
