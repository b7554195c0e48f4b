//! Model backends: one loaded model version and the executor behind it.
//!
//! - [`normalize`]: request header validation against model metadata
//! - [`platform`]: platform registry and built-in executors

pub mod normalize;
pub mod platform;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::info;

use crate::error::Result;
use crate::model::config::ModelConfig;
use crate::model::labels::LabelProvider;
use crate::model::repository::ModelDefinition;
use crate::protocol::InferRequestHeader;
use crate::provider::{InferRequestProvider, InferResponseProvider};
use crate::server::metrics::{MetricReporter, ServerMetrics};
use crate::server::scheduler::{QueuedRequest, Scheduler};

pub use normalize::normalize_request_header;
pub use platform::{ExecutorFactory, PlatformRegistry, ADD_SUB_PLATFORM, IDENTITY_PLATFORM};

/// Runs one request against a model.
///
/// Executors read inputs from `request` and store outputs in `response`. An
/// error (or a panic) is reported through the response status.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &InferRequestProvider,
        response: &mut InferResponseProvider,
    ) -> Result<()>;
}

/// A loaded, ready model version.
pub struct InferenceBackend {
    name: String,
    version: u64,
    config: ModelConfig,
    labels: Arc<LabelProvider>,
    metrics: Option<MetricReporter>,
    scheduler: Scheduler,
}

impl InferenceBackend {
    /// Load `version` of `definition` and start its scheduler on `runtime`.
    pub(crate) fn load(
        definition: &ModelDefinition,
        version: u64,
        platforms: &PlatformRegistry,
        runtime: &Handle,
        queue_capacity: usize,
        metrics: Option<&ServerMetrics>,
    ) -> Result<Self> {
        let config = definition.config.clone();
        let labels = Arc::new(LabelProvider::load(&definition.dir, &config)?);
        let executor = platforms.create_executor(&config, &definition.version_dir(version))?;
        let scheduler = Scheduler::spawn(
            runtime,
            &definition.name,
            version,
            executor,
            config.instance_count,
            queue_capacity,
        );
        let metrics = metrics.map(|m| m.reporter(&definition.name, version));

        info!(
            model = %definition.name,
            version,
            platform = %config.platform,
            instances = config.instance_count,
            "Loaded model version"
        );

        Ok(Self {
            name: definition.name.clone(),
            version,
            config,
            labels,
            metrics,
            scheduler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn labels(&self) -> Arc<LabelProvider> {
        self.labels.clone()
    }

    pub fn metrics(&self) -> Option<&MetricReporter> {
        self.metrics.as_ref()
    }

    pub fn normalize(&self, header: &mut InferRequestHeader) -> Result<()> {
        normalize_request_header(&self.config, header)
    }

    pub(crate) fn enqueue(&self, request: QueuedRequest) -> Result<()> {
        self.scheduler.enqueue(request)
    }
}

impl std::fmt::Debug for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBackend")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("platform", &self.config.platform)
            .finish()
    }
}
