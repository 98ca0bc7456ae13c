//! Engine registry with lazy load and idle-based unload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use inferd_core::download::EngineCreationSpec;
use inferd_core::engine::{
    CompletionOutcome, CompletionParameters, EngineStatus, LoadingParameters,
};
use inferd_core::error::CoreError;
use inferd_core::ports::{CompletionBackend, EngineDeployer, EngineLoader, InferenceEngine};
use inferd_download::{DownloadManager, is_url};

/// Autoscaler wakes up at least this often to scan for idle engines.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Bounded wait when joining the autoscaler task at shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry entry for one engine.
///
/// Invariant: `loaded ⇔ handle.is_some()`.
struct EngineRecord {
    model_path: PathBuf,
    load_params: LoadingParameters,
    gpu_id: i32,
    handle: Option<Arc<dyn InferenceEngine>>,
    loaded: bool,
    last_activity: Instant,
}

/// Engine registry: validate, load, lazy-register, unload by idle timer.
pub struct NodeManager {
    engines: Mutex<HashMap<String, EngineRecord>>,
    loader: Arc<dyn EngineLoader>,
    downloads: Arc<DownloadManager>,
    idle_timeout: Duration,
    /// Wakes the autoscaler early on activity or registry changes.
    kick: Notify,
    stop: AtomicBool,
    autoscaler_started: AtomicBool,
    autoscaler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NodeManager {
    #[must_use]
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        downloads: Arc<DownloadManager>,
        idle_timeout: Duration,
    ) -> Self {
        tracing::info!(idle_timeout_s = idle_timeout.as_secs(), "NodeManager initialized");
        Self {
            engines: Mutex::new(HashMap::new()),
            loader,
            downloads,
            idle_timeout,
            kick: Notify::new(),
            stop: AtomicBool::new(false),
            autoscaler_started: AtomicBool::new(false),
            autoscaler: std::sync::Mutex::new(None),
        }
    }

    /// Start the autoscaler task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self
            .autoscaler_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                manager.autoscale_loop().await;
            });
            *self.autoscaler.lock().expect("autoscaler lock poisoned") = Some(handle);
        }
    }

    /// Add an engine and load it immediately.
    pub async fn add_engine(
        &self,
        engine_id: &str,
        model_path: &str,
        load_params: LoadingParameters,
        gpu_id: i32,
    ) -> Result<(), CoreError> {
        self.create_record(engine_id, model_path, load_params, gpu_id, true)
            .await
    }

    /// Register an engine for lazy loading: the first `get_engine` loads it.
    pub async fn register_engine(
        &self,
        engine_id: &str,
        model_path: &str,
        load_params: LoadingParameters,
        gpu_id: i32,
    ) -> Result<(), CoreError> {
        self.create_record(engine_id, model_path, load_params, gpu_id, false)
            .await
    }

    async fn create_record(
        &self,
        engine_id: &str,
        model_path: &str,
        load_params: LoadingParameters,
        gpu_id: i32,
        load_now: bool,
    ) -> Result<(), CoreError> {
        if self.engines.lock().await.contains_key(engine_id) {
            tracing::warn!(engine_id, "Engine already exists");
            return Err(CoreError::Conflict(format!(
                "engine '{engine_id}' already exists"
            )));
        }

        self.validate_model_path(model_path).await?;

        // Resolve URLs to a local copy before touching the registry lock;
        // partial local copies resume, complete copies are reused.
        let local_path = if is_url(model_path) {
            tracing::info!(engine_id, url = model_path, "Model path is a URL, downloading");
            self.downloads
                .download_and_wait(engine_id, model_path)
                .await
                .map_err(CoreError::Download)?
        } else {
            PathBuf::from(model_path)
        };

        let mut engines = self.engines.lock().await;
        if engines.contains_key(engine_id) {
            return Err(CoreError::Conflict(format!(
                "engine '{engine_id}' already exists"
            )));
        }

        let handle = if load_now {
            let engine = self
                .loader
                .load(&local_path, &load_params, gpu_id)
                .await
                .map_err(CoreError::from)?;
            tracing::info!(engine_id, path = %local_path.display(), "Engine loaded");
            Some(engine)
        } else {
            tracing::info!(engine_id, path = %local_path.display(), "Engine registered for lazy loading");
            None
        };

        engines.insert(
            engine_id.to_string(),
            EngineRecord {
                model_path: local_path,
                load_params,
                gpu_id,
                loaded: handle.is_some(),
                handle,
                last_activity: Instant::now(),
            },
        );
        drop(engines);
        self.kick.notify_one();
        Ok(())
    }

    /// Look up an engine, lazily reloading it if the autoscaler unloaded it.
    ///
    /// This is the only place the idle timer is reset. Returns `None` for an
    /// unknown id or a failed reload; a failed reload leaves the record
    /// unloaded.
    pub async fn get_engine(&self, engine_id: &str) -> Option<Arc<dyn InferenceEngine>> {
        let mut engines = self.engines.lock().await;
        let Some(record) = engines.get_mut(engine_id) else {
            tracing::warn!(engine_id, "Engine not found");
            return None;
        };

        if !record.loaded {
            tracing::info!(engine_id, "Engine was unloaded due to inactivity, reloading");
            // Lock held across the load so there is never more than one load
            // attempt per id in flight.
            match self
                .loader
                .load(&record.model_path, &record.load_params, record.gpu_id)
                .await
            {
                Ok(engine) => {
                    record.handle = Some(engine);
                    record.loaded = true;
                    tracing::info!(engine_id, "Engine reloaded");
                }
                Err(err) => {
                    record.handle = None;
                    tracing::error!(engine_id, error = %err, "Engine reload failed");
                    return None;
                }
            }
        }

        record.last_activity = Instant::now();
        let handle = record.handle.clone();
        drop(engines);
        self.kick.notify_one();
        handle
    }

    /// Unload (if loaded) and erase an engine record.
    pub async fn remove_engine(&self, engine_id: &str) -> Result<(), CoreError> {
        let record = self.engines.lock().await.remove(engine_id);
        match record {
            Some(record) => {
                if let Some(engine) = record.handle {
                    engine.unload().await;
                    tracing::info!(engine_id, "Engine unloaded");
                }
                tracing::info!(engine_id, "Engine removed");
                self.kick.notify_one();
                Ok(())
            }
            None => {
                tracing::warn!(engine_id, "Attempted to remove non-existent engine");
                Err(CoreError::NotFound(format!("engine '{engine_id}'")))
            }
        }
    }

    pub async fn list_engine_ids(&self) -> Vec<String> {
        self.engines.lock().await.keys().cloned().collect()
    }

    pub async fn engine_status(&self, engine_id: &str) -> Option<EngineStatus> {
        self.engines.lock().await.get(engine_id).map(|record| {
            if record.loaded {
                EngineStatus::Loaded
            } else {
                EngineStatus::Unloaded
            }
        })
    }

    /// Validate a model path: a reachable URL, a regular `.gguf` file, or a
    /// directory containing at least one `.gguf` file.
    pub async fn validate_model_path(&self, model_path: &str) -> Result<(), CoreError> {
        if is_url(model_path) {
            return match self.downloads.probe_url(model_path).await {
                Ok(size) => {
                    tracing::info!(url = model_path, size, "URL is reachable");
                    Ok(())
                }
                Err(err) => Err(CoreError::ModelLoading(format!(
                    "URL not reachable: {model_path}: {err}"
                ))),
            };
        }

        let path = Path::new(model_path);
        if !path.exists() {
            return Err(CoreError::ModelLoading(format!(
                "model file does not exist: {model_path}"
            )));
        }
        if path.is_dir() {
            let has_gguf = std::fs::read_dir(path)
                .map_err(|e| CoreError::ModelLoading(format!("cannot read {model_path}: {e}")))?
                .filter_map(Result::ok)
                .any(|entry| {
                    entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
                });
            if has_gguf {
                return Ok(());
            }
            return Err(CoreError::ModelLoading(format!(
                "directory contains no .gguf file: {model_path}"
            )));
        }
        if !path.is_file() {
            return Err(CoreError::ModelLoading(format!(
                "model path is not a regular file: {model_path}"
            )));
        }
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
        {
            return Err(CoreError::ModelLoading(format!(
                "unsupported model format: {model_path}"
            )));
        }
        Ok(())
    }

    /// One autoscaler pass: unload engines idle past the timeout, unless
    /// they report active jobs. The decision is atomic with the activity
    /// check because the registry lock is held throughout.
    pub async fn sweep_idle(&self) {
        let now = Instant::now();
        let mut engines = self.engines.lock().await;
        for (engine_id, record) in engines.iter_mut() {
            if !record.loaded {
                continue;
            }
            let idle = now.duration_since(record.last_activity);
            if idle < self.idle_timeout {
                continue;
            }
            let Some(engine) = &record.handle else {
                continue;
            };
            if engine.has_active_jobs() {
                tracing::debug!(engine_id = %engine_id, idle_s = idle.as_secs(), "Idle engine has active jobs, skipping unload");
                continue;
            }
            engine.unload().await;
            record.handle = None;
            record.loaded = false;
            tracing::info!(
                engine_id = %engine_id,
                idle_s = idle.as_secs(),
                threshold_s = self.idle_timeout.as_secs(),
                "Engine unloaded due to inactivity"
            );
        }
    }

    async fn autoscale_loop(self: Arc<Self>) {
        tracing::info!("Autoscaler started");
        loop {
            let _ = tokio::time::timeout(SWEEP_INTERVAL, self.kick.notified()).await;
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.sweep_idle().await;
        }
        tracing::info!("Autoscaler stopped");
    }

    /// Stop the autoscaler and unload every engine. Idempotent.
    pub async fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.kick.notify_one();
        let handle = self.autoscaler.lock().expect("autoscaler lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await;
        }

        let mut engines = self.engines.lock().await;
        for (engine_id, record) in engines.iter_mut() {
            if let Some(engine) = record.handle.take() {
                engine.unload().await;
                record.loaded = false;
                tracing::info!(engine_id = %engine_id, "Engine unloaded during shutdown");
            }
        }
        engines.clear();
        tracing::info!("NodeManager shut down");
    }
}

#[async_trait]
impl EngineDeployer for NodeManager {
    async fn deploy(&self, spec: &EngineCreationSpec, model_path: &Path) -> Result<(), CoreError> {
        let path = model_path.to_string_lossy();
        if spec.load_immediately {
            self.add_engine(&spec.engine_id, &path, spec.load_params.clone(), spec.gpu_id)
                .await
        } else {
            self.register_engine(&spec.engine_id, &path, spec.load_params.clone(), spec.gpu_id)
                .await
        }
    }
}

#[async_trait]
impl CompletionBackend for NodeManager {
    async fn completion(
        &self,
        engine_id: &str,
        params: CompletionParameters,
    ) -> Result<CompletionOutcome, CoreError> {
        let engine = self
            .get_engine(engine_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("engine '{engine_id}'")))?;
        engine
            .complete(params)
            .await
            .map_err(|e| CoreError::Execution(e.to_string()))
    }

    async fn has_engine(&self, engine_id: &str) -> bool {
        self.engines.lock().await.contains_key(engine_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubEngineLoader;
    use std::io::Write;

    fn write_model(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"GGUF-test-bytes").unwrap();
        path
    }

    fn manager_with_timeout(idle: Duration) -> (Arc<NodeManager>, Arc<StubEngineLoader>) {
        let loader = Arc::new(StubEngineLoader::new());
        let downloads = Arc::new(DownloadManager::new("./models-test"));
        let manager = Arc::new(NodeManager::new(loader.clone(), downloads, idle));
        (manager, loader)
    }

    #[tokio::test]
    async fn add_engine_loads_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(&dir, "m.gguf");
        let (manager, loader) = manager_with_timeout(Duration::from_secs(60));

        manager
            .add_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap();
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Loaded));
        assert_eq!(loader.load_count(), 1);

        let err = manager
            .add_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_engine_defers_load_until_get() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(&dir, "m.gguf");
        let (manager, loader) = manager_with_timeout(Duration::from_secs(60));

        manager
            .register_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap();
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Unloaded));
        assert_eq!(loader.load_count(), 0);

        assert!(manager.get_engine("e1").await.is_some());
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Loaded));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn idle_engines_unload_and_lazily_reload() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(&dir, "m.gguf");
        let (manager, loader) = manager_with_timeout(Duration::from_millis(20));

        manager
            .add_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap();
        assert!(manager.get_engine("e1").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        manager.sweep_idle().await;
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Unloaded));

        // Next lookup reloads and refreshes the idle timer.
        assert!(manager.get_engine("e1").await.is_some());
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Loaded));
        assert_eq!(loader.load_count(), 2);
        manager.sweep_idle().await;
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Loaded));
    }

    #[tokio::test]
    async fn busy_engines_survive_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(&dir, "m.gguf");
        let (manager, loader) = manager_with_timeout(Duration::from_millis(1));
        loader.set_busy(true);

        manager
            .add_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.sweep_idle().await;
        assert_eq!(manager.engine_status("e1").await, Some(EngineStatus::Loaded));
    }

    #[tokio::test]
    async fn unknown_engine_returns_none_and_remove_errors() {
        let (manager, _) = manager_with_timeout(Duration::from_secs(60));
        assert!(manager.get_engine("missing").await.is_none());
        assert!(matches!(
            manager.remove_engine("missing").await.unwrap_err(),
            CoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn remove_engine_erases_record() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(&dir, "m.gguf");
        let (manager, _) = manager_with_timeout(Duration::from_secs(60));

        manager
            .add_engine("e1", model.to_str().unwrap(), LoadingParameters::default(), 0)
            .await
            .unwrap();
        manager.remove_engine("e1").await.unwrap();
        assert!(manager.list_engine_ids().await.is_empty());
        assert!(manager.engine_status("e1").await.is_none());
    }

    #[tokio::test]
    async fn validate_rejects_bad_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with_timeout(Duration::from_secs(60));

        // Missing file
        assert!(manager.validate_model_path("/nonexistent/m.gguf").await.is_err());

        // Wrong extension
        let txt = dir.path().join("m.txt");
        std::fs::write(&txt, b"x").unwrap();
        assert!(manager
            .validate_model_path(txt.to_str().unwrap())
            .await
            .is_err());

        // Directory without any .gguf
        assert!(manager
            .validate_model_path(dir.path().to_str().unwrap())
            .await
            .is_err());

        // Directory containing a .gguf is acceptable
        write_model(&dir, "m.gguf");
        assert!(manager
            .validate_model_path(dir.path().to_str().unwrap())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn completion_backend_reports_missing_engines() {
        let (manager, _) = manager_with_timeout(Duration::from_secs(60));
        assert!(!manager.has_engine("e1").await);
        let err = manager
            .completion("e1", CompletionParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
