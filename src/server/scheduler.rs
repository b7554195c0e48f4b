//! Per-backend request queue and its worker tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::backend::ModelExecutor;
use crate::error::{panic_message, Result, Status};
use crate::provider::{InferRequestProvider, InferResponseProvider};
use crate::server::completion::InferResponse;
use crate::server::stats::ModelInferStats;

/// An assembled request waiting for an executor instance.
pub(crate) struct QueuedRequest {
    pub request: InferRequestProvider,
    pub response: InferResponseProvider,
    pub stats: ModelInferStats,
    pub complete: oneshot::Sender<InferResponse>,
}

/// Bounded FIFO drained by `instance_count` worker tasks.
pub(crate) struct Scheduler {
    model: String,
    version: u64,
    queue: mpsc::Sender<QueuedRequest>,
}

impl Scheduler {
    pub fn spawn(
        runtime: &Handle,
        model: &str,
        version: u64,
        executor: Arc<dyn ModelExecutor>,
        instance_count: u32,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for instance in 0..instance_count.max(1) {
            runtime.spawn(run_instance(
                model.to_string(),
                version,
                instance,
                executor.clone(),
                rx.clone(),
            ));
        }

        Self {
            model: model.to_string(),
            version,
            queue: tx,
        }
    }

    /// Queue a request without waiting. A full or closed queue is `UNAVAILABLE`.
    pub fn enqueue(&self, request: QueuedRequest) -> Result<()> {
        match self.queue.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Status::unavailable(format!(
                "request queue for model '{}' version {} is full",
                self.model, self.version
            ))),
            Err(TrySendError::Closed(_)) => Err(Status::unavailable(format!(
                "model '{}' version {} is no longer accepting requests",
                self.model, self.version
            ))),
        }
    }
}

async fn run_instance(
    model: String,
    version: u64,
    instance: u32,
    executor: Arc<dyn ModelExecutor>,
    queue: Arc<Mutex<mpsc::Receiver<QueuedRequest>>>,
) {
    debug!(model = %model, version, instance, "Scheduler instance started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(request) = next else { break };
        execute(&model, executor.as_ref(), request).await;
    }
    debug!(model = %model, version, instance, "Scheduler instance stopped");
}

async fn execute(model: &str, executor: &dyn ModelExecutor, queued: QueuedRequest) {
    let QueuedRequest {
        request,
        mut response,
        mut stats,
        complete,
    } = queued;

    stats.mark_compute_start();
    let outcome = AssertUnwindSafe(executor.execute(&request, &mut response))
        .catch_unwind()
        .await;
    stats.mark_compute_end();

    let status = match outcome {
        Ok(Ok(())) => response.finalize(),
        Ok(Err(e)) => Err(e),
        Err(panic) => Err(Status::internal(format!(
            "model '{model}' panicked during execution: {}",
            panic_message(panic.as_ref())
        ))),
    };
    if let Err(e) = &status {
        warn!(model, id = request.header().id, error = %e, "Inference failed");
        response.clear_outputs();
    }
    stats.finish(status.is_ok());

    if complete.send(InferResponse::new(status, response)).is_err() {
        debug!(model, "Completion receiver dropped");
    }
}
