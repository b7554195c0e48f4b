//! Model status bookkeeping and per-request statistics.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::model::repository::ModelDefinition;
use crate::protocol::{ModelReadyState, ModelStatus, ModelVersionStatus};
use crate::server::metrics::MetricReporter;

/// Ready state and accumulated statistics of every discovered model.
#[derive(Debug, Default)]
pub struct StatusManager {
    models: Mutex<BTreeMap<String, ModelStatus>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ModelStatus>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a model whose versions are about to load.
    pub fn add_model(&self, definition: &ModelDefinition) {
        let version_status = definition
            .versions
            .iter()
            .map(|v| {
                (
                    *v,
                    ModelVersionStatus {
                        ready_state: ModelReadyState::Loading,
                        ..Default::default()
                    },
                )
            })
            .collect();
        self.lock().insert(
            definition.name.clone(),
            ModelStatus {
                config: Some(definition.config.clone()),
                reason: None,
                version_status,
            },
        );
    }

    /// Register a model that could not be read at all.
    pub fn add_unavailable_model(&self, name: &str, reason: impl Into<String>) {
        self.lock().insert(
            name.to_string(),
            ModelStatus {
                config: None,
                reason: Some(reason.into()),
                version_status: BTreeMap::new(),
            },
        );
    }

    pub fn set_version_state(
        &self,
        name: &str,
        version: u64,
        state: ModelReadyState,
        reason: Option<String>,
    ) {
        let mut models = self.lock();
        let entry = models
            .entry(name.to_string())
            .or_default()
            .version_status
            .entry(version)
            .or_default();
        entry.ready_state = state;
        entry.reason = reason;
    }

    /// Ready state of one version, `None` if the version is unknown.
    pub fn version_state(&self, name: &str, version: u64) -> Option<ModelReadyState> {
        self.lock()
            .get(name)
            .and_then(|m| m.version_status.get(&version))
            .map(|v| v.ready_state)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn model_status(&self, name: &str) -> Option<ModelStatus> {
        self.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ModelStatus> {
        self.lock().clone()
    }

    /// Whether every registered model loaded all of its versions.
    pub fn all_fully_ready(&self) -> bool {
        self.lock().values().all(ModelStatus::is_fully_ready)
    }

    fn record(
        &self,
        name: &str,
        version: u64,
        batch_size: u32,
        update: impl FnOnce(&mut ModelVersionStatus, u32),
    ) {
        let mut models = self.lock();
        if let Some(status) = models
            .get_mut(name)
            .and_then(|m| m.version_status.get_mut(&version))
        {
            update(status, batch_size);
        }
    }

    pub fn record_success(
        &self,
        name: &str,
        version: u64,
        batch_size: u32,
        request: Duration,
        compute: Duration,
        queue: Duration,
    ) {
        self.record(name, version, batch_size, |status, batch_size| {
            let stats = status.infer_stats.entry(batch_size).or_default();
            stats.success.record(nanos(request));
            stats.compute.record(nanos(compute));
            stats.queue.record(nanos(queue));
            status.model_execution_count += 1;
            status.model_inference_count += u64::from(batch_size);
        });
    }

    pub fn record_failure(&self, name: &str, version: u64, batch_size: u32, request: Duration) {
        self.record(name, version, batch_size, |status, batch_size| {
            status
                .infer_stats
                .entry(batch_size)
                .or_default()
                .failed
                .record(nanos(request));
        });
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Timing of one request from submission to completion.
///
/// Reports to the status manager and metrics exactly once. A request that
/// is dropped before [`finish`](Self::finish) is recorded as failed.
pub struct ModelInferStats {
    status: Arc<StatusManager>,
    metrics: Option<MetricReporter>,
    model_name: String,
    version: Option<u64>,
    batch_size: u32,
    start: Instant,
    compute_start: Option<Instant>,
    compute_end: Option<Instant>,
    finished: bool,
}

impl ModelInferStats {
    pub fn new(status: Arc<StatusManager>, model_name: &str) -> Self {
        Self {
            status,
            metrics: None,
            model_name: model_name.to_string(),
            version: None,
            batch_size: 0,
            start: Instant::now(),
            compute_start: None,
            compute_end: None,
            finished: false,
        }
    }

    /// Attach the resolved version. Nothing is recorded before this.
    pub fn set_model_version(&mut self, version: u64, metrics: Option<MetricReporter>) {
        self.version = Some(version);
        self.metrics = metrics;
    }

    pub fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = batch_size;
    }

    pub fn mark_compute_start(&mut self) {
        self.compute_start = Some(Instant::now());
    }

    pub fn mark_compute_end(&mut self) {
        self.compute_end = Some(Instant::now());
    }

    pub fn finish(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(version) = self.version else {
            return;
        };
        let end = Instant::now();
        let request = end - self.start;

        if success {
            let compute_start = self.compute_start.unwrap_or(end);
            let compute_end = self.compute_end.unwrap_or(end);
            let queue = compute_start.saturating_duration_since(self.start);
            let compute = compute_end.saturating_duration_since(compute_start);
            self.status.record_success(
                &self.model_name,
                version,
                self.batch_size,
                request,
                compute,
                queue,
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_success(self.batch_size, request, compute, queue);
            }
        } else {
            self.status
                .record_failure(&self.model_name, version, self.batch_size, request);
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(request);
            }
        }
    }
}

impl Drop for ModelInferStats {
    fn drop(&mut self) {
        self.finish(false);
    }
}
