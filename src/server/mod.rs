//! The inference engine behind the C surface.
//!
//! - [`completion`]: responses and in-flight tracking
//! - [`metrics`]: per-server prometheus counters
//! - [`scheduler`]: per-backend queues and worker tasks
//! - [`stats`]: model status and request statistics

pub mod completion;
pub mod metrics;
pub(crate) mod scheduler;
pub mod stats;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::{InferenceBackend, PlatformRegistry};
use crate::config::ServerOptions;
use crate::error::{Result, Status};
use crate::model::repository;
use crate::protocol::{ModelReadyState, ServerReadyState, ServerStatus};
use crate::provider::{InferRequestProvider, InferResponseProvider, InferenceRequest};

pub use completion::{InferResponse, InflightTracker};
pub use metrics::{MetricReporter, ServerMetrics};
pub use stats::{ModelInferStats, StatusManager};

use scheduler::QueuedRequest;

type VersionMap = BTreeMap<u64, Arc<InferenceBackend>>;

static NEXT_RUNTIME_SERIAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Serial of the engine runtime owning this thread, 0 elsewhere.
    static ENGINE_RUNTIME: Cell<u64> = const { Cell::new(0) };
}

/// An inference server: a model repository loaded onto a private runtime.
pub struct InferenceServer {
    id: String,
    options: ServerOptions,
    runtime: Mutex<Option<Runtime>>,
    runtime_serial: u64,
    handle: Handle,
    state: RwLock<ServerReadyState>,
    exiting: AtomicBool,
    backends: BTreeMap<String, VersionMap>,
    status: Arc<StatusManager>,
    metrics: Option<ServerMetrics>,
    inflight: Arc<InflightTracker>,
    start_time: Instant,
}

impl InferenceServer {
    /// Create a server with the built-in platforms.
    pub fn new(options: ServerOptions) -> Result<Self> {
        Self::with_platforms(options, &PlatformRegistry::with_builtins())
    }

    /// Scan the repository and load every model version it selects.
    ///
    /// Fails only when the repository itself is unusable; models that fail
    /// to load are reported as unavailable in the server status.
    pub fn with_platforms(options: ServerOptions, platforms: &PlatformRegistry) -> Result<Self> {
        let start_time = Instant::now();
        let id = if options.server_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            options.server_id.clone()
        };

        let models = repository::scan(&options.model_repository_path)?;
        let runtime_serial = NEXT_RUNTIME_SERIAL.fetch_add(1, Ordering::Relaxed);
        let runtime = build_runtime(&options, runtime_serial)?;
        let handle = runtime.handle().clone();
        let metrics = if options.metrics {
            Some(ServerMetrics::new()?)
        } else {
            None
        };

        info!(
            server_id = %id,
            repository = %options.model_repository_path.display(),
            models = models.len(),
            "Initializing inference server"
        );

        let status = Arc::new(StatusManager::new());
        let mut backends = BTreeMap::new();
        for model in models {
            let definition = match model.definition {
                Ok(definition) => definition,
                Err(e) => {
                    status.add_unavailable_model(&model.name, e.message());
                    continue;
                }
            };

            status.add_model(&definition);
            let mut versions = VersionMap::new();
            for &version in &definition.versions {
                match InferenceBackend::load(
                    &definition,
                    version,
                    platforms,
                    &handle,
                    options.queue_capacity,
                    metrics.as_ref(),
                ) {
                    Ok(backend) => {
                        status.set_version_state(&definition.name, version, ModelReadyState::Ready, None);
                        versions.insert(version, Arc::new(backend));
                    }
                    Err(e) => {
                        warn!(model = %definition.name, version, error = %e, "Failed to load model version");
                        status.set_version_state(
                            &definition.name,
                            version,
                            ModelReadyState::Unavailable,
                            Some(e.message().to_string()),
                        );
                    }
                }
            }
            if !versions.is_empty() {
                backends.insert(definition.name.clone(), versions);
            }
        }

        info!(
            server_id = %id,
            loaded = backends.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Inference server ready"
        );

        Ok(Self {
            id,
            options,
            runtime: Mutex::new(Some(runtime)),
            runtime_serial,
            handle,
            state: RwLock::new(ServerReadyState::Ready),
            exiting: AtomicBool::new(false),
            backends,
            status,
            metrics,
            inflight: Arc::new(InflightTracker::default()),
            start_time,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn ready_state(&self) -> ServerReadyState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_live(&self) -> bool {
        self.ready_state().is_live()
    }

    pub fn is_ready(&self) -> bool {
        self.ready_state() == ServerReadyState::Ready
            && !self.backends.is_empty()
            && (!self.options.strict_readiness || self.status.all_fully_ready())
    }

    /// Status of every model, or of `model` alone.
    pub fn status(&self, model: Option<&str>) -> Result<ServerStatus> {
        let model_status = match model {
            None => self.status.snapshot(),
            Some(name) => {
                let status = self
                    .status
                    .model_status(name)
                    .ok_or_else(|| model_not_found(name))?;
                BTreeMap::from([(name.to_string(), status)])
            }
        };

        Ok(ServerStatus {
            id: self.id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ready_state: self.ready_state(),
            uptime_ns: u64::try_from(self.start_time.elapsed().as_nanos()).unwrap_or(u64::MAX),
            model_status,
        })
    }

    /// Prometheus text exposition; `UNSUPPORTED` when metrics are disabled.
    pub fn metrics_text(&self) -> Result<String> {
        self.metrics
            .as_ref()
            .ok_or_else(|| Status::unsupported("metrics are disabled for this server"))?
            .gather_text()
    }

    /// Find the backend serving `model` at `version`; a negative version
    /// selects the highest ready one.
    pub fn backend(&self, model: &str, version: i64) -> Result<Arc<InferenceBackend>> {
        if !self.status.contains(model) {
            return Err(model_not_found(model));
        }
        let versions = self.backends.get(model);

        if version < 0 {
            return versions
                .and_then(|v| v.values().next_back())
                .cloned()
                .ok_or_else(|| {
                    Status::not_found(format!("model '{model}' has no ready versions"))
                });
        }

        let version = version as u64;
        if let Some(backend) = versions.and_then(|v| v.get(&version)) {
            return Ok(backend.clone());
        }
        match self.status.version_state(model, version) {
            Some(state) => Err(Status::unavailable(format!(
                "version {version} of model '{model}' is not ready ({state:?})"
            ))),
            None => Err(Status::not_found(format!(
                "version {version} of model '{model}' is not found"
            ))),
        }
    }

    /// Validate and assemble `request`, then queue it.
    ///
    /// Once this returns `Ok`, `on_complete` runs exactly once on an engine
    /// thread. On `Err` it never runs.
    pub fn infer_async<F>(&self, request: InferenceRequest<'_>, on_complete: F) -> Result<()>
    where
        F: FnOnce(InferResponse) + Send + 'static,
    {
        let guard = self.inflight.enter();
        if self.exiting.load(Ordering::SeqCst) {
            return Err(Status::unavailable("server is shutting down"));
        }

        let mut stats = ModelInferStats::new(self.status.clone(), request.model_name);
        let backend = self.backend(request.model_name, request.model_version)?;
        stats.set_model_version(backend.version(), backend.metrics().cloned());

        let mut header = request.header.clone();
        stats.set_batch_size(header.batch_size);
        backend.normalize(&mut header)?;

        let provider = InferRequestProvider::create(
            backend.name(),
            backend.version(),
            header.clone(),
            backend.config(),
            &request.inputs,
        )?;
        let response = InferResponseProvider::create(
            &header,
            backend.config(),
            backend.version(),
            backend.labels(),
        )?;

        let (tx, rx) = oneshot::channel();
        backend.enqueue(QueuedRequest {
            request: provider,
            response,
            stats,
            complete: tx,
        })?;

        debug!(
            model = backend.name(),
            version = backend.version(),
            id = header.id,
            batch_size = header.batch_size,
            "Queued inference request"
        );

        let model = backend.name().to_string();
        self.handle.spawn(async move {
            let response = rx.await.unwrap_or_else(|_| {
                InferResponse::failed(Status::internal(format!(
                    "request for model '{model}' was dropped before completion"
                )))
            });
            on_complete(response);
            drop(guard);
        });
        Ok(())
    }

    /// Reject new submissions, wait up to the exit timeout for in-flight
    /// callbacks, then stop the runtime. Idempotent.
    ///
    /// Blocks the caller, except on one of this server's own engine threads
    /// (a completion callback deleting its server), where the drain
    /// continues on a helper thread.
    pub fn stop(&self) {
        let Some(runtime) = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = ServerReadyState::Exiting;
        self.exiting.store(true, Ordering::SeqCst);
        info!(server_id = %self.id, inflight = self.inflight.count(), "Stopping inference server");

        let drain = RuntimeDrain {
            runtime,
            inflight: self.inflight.clone(),
            timeout: self.options.exit_timeout(),
            server_id: self.id.clone(),
        };
        if Handle::try_current().is_err() {
            drain.run();
            return;
        }

        // Blocking on a runtime from inside any runtime panics.
        let on_engine_thread = ENGINE_RUNTIME.with(Cell::get) == self.runtime_serial;
        let (tx, rx) = mpsc::channel::<RuntimeDrain>();
        let spawned = thread::Builder::new()
            .name("tserve-shutdown".to_string())
            .spawn(move || {
                if let Ok(drain) = rx.recv() {
                    drain.run();
                }
            });
        match spawned {
            Ok(helper) => {
                if let Err(mpsc::SendError(drain)) = tx.send(drain) {
                    drain.abandon();
                    return;
                }
                if on_engine_thread {
                    info!(server_id = %self.id, "Stopped from an engine thread, draining in the background");
                } else if helper.join().is_err() {
                    warn!(server_id = %self.id, "Shutdown thread panicked");
                }
            }
            Err(e) => {
                warn!(server_id = %self.id, error = %e, "Failed to start shutdown thread");
                drain.abandon();
            }
        }
    }
}

/// A stopped server's runtime, waiting for in-flight callbacks.
struct RuntimeDrain {
    runtime: Runtime,
    inflight: Arc<InflightTracker>,
    timeout: Duration,
    server_id: String,
}

impl RuntimeDrain {
    /// Must not be called from inside a runtime.
    fn run(self) {
        let drained = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, self.inflight.wait_idle())
                .await
                .is_ok()
        });
        if !drained {
            warn!(
                server_id = %self.server_id,
                inflight = self.inflight.count(),
                timeout_secs = self.timeout.as_secs(),
                "Exit timeout elapsed with requests still in flight"
            );
        }
        self.runtime.shutdown_timeout(Duration::from_millis(100));
        info!(server_id = %self.server_id, "Inference server stopped");
    }

    fn abandon(self) {
        if self.inflight.count() > 0 {
            warn!(
                server_id = %self.server_id,
                inflight = self.inflight.count(),
                "Abandoning in-flight requests"
            );
        }
        self.runtime.shutdown_background();
    }
}

impl Drop for InferenceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for InferenceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceServer")
            .field("id", &self.id)
            .field("state", &self.ready_state())
            .field("models", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn model_not_found(model: &str) -> Status {
    Status::not_found(format!("model '{model}' is not found"))
}

fn build_runtime(options: &ServerOptions, serial: u64) -> Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .thread_name("tserve-worker")
        .on_thread_start(move || ENGINE_RUNTIME.with(|r| r.set(serial)));
    if options.worker_threads > 0 {
        builder.worker_threads(options.worker_threads);
    }
    builder
        .build()
        .map_err(|e| Status::internal(format!("failed to start engine runtime: {e}")))
}
