//! Prometheus metrics, one registry per server.

use std::time::Duration;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Result, Status};

const LABELS: [&str; 2] = ["model", "version"];

/// Per-server inference counters labelled by model and version.
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    request_success: IntCounterVec,
    request_failure: IntCounterVec,
    inference_count: IntCounterVec,
    execution_count: IntCounterVec,
    request_duration_us: IntCounterVec,
    compute_duration_us: IntCounterVec,
    queue_duration_us: IntCounterVec,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help), &LABELS).map_err(metrics_error)?;
            registry
                .register(Box::new(vec.clone()))
                .map_err(metrics_error)?;
            Ok(vec)
        };

        Ok(Self {
            request_success: counter(
                "tserve_inference_request_success",
                "Number of successful inference requests",
            )?,
            request_failure: counter(
                "tserve_inference_request_failure",
                "Number of failed inference requests",
            )?,
            inference_count: counter(
                "tserve_inference_count",
                "Number of inferences performed, counting each batch item",
            )?,
            execution_count: counter(
                "tserve_inference_exec_count",
                "Number of model executions performed",
            )?,
            request_duration_us: counter(
                "tserve_inference_request_duration_us",
                "Cumulative inference request duration in microseconds",
            )?,
            compute_duration_us: counter(
                "tserve_inference_compute_duration_us",
                "Cumulative inference compute duration in microseconds",
            )?,
            queue_duration_us: counter(
                "tserve_inference_queue_duration_us",
                "Cumulative inference queuing duration in microseconds",
            )?,
            registry,
        })
    }

    /// Counters bound to one model version.
    pub fn reporter(&self, model: &str, version: u64) -> MetricReporter {
        let version = version.to_string();
        let labels = [model, version.as_str()];
        MetricReporter {
            request_success: self.request_success.with_label_values(&labels[..]),
            request_failure: self.request_failure.with_label_values(&labels[..]),
            inference_count: self.inference_count.with_label_values(&labels[..]),
            execution_count: self.execution_count.with_label_values(&labels[..]),
            request_duration_us: self.request_duration_us.with_label_values(&labels[..]),
            compute_duration_us: self.compute_duration_us.with_label_values(&labels[..]),
            queue_duration_us: self.queue_duration_us.with_label_values(&labels[..]),
        }
    }

    /// Prometheus text exposition of every counter.
    pub fn gather_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(metrics_error)?;
        String::from_utf8(buf).map_err(|e| Status::internal(format!("metrics are not UTF-8: {e}")))
    }
}

fn metrics_error(err: prometheus::Error) -> Status {
    Status::internal(format!("metrics error: {err}"))
}

/// Counters of a single model version.
#[derive(Clone)]
pub struct MetricReporter {
    request_success: IntCounter,
    request_failure: IntCounter,
    inference_count: IntCounter,
    execution_count: IntCounter,
    request_duration_us: IntCounter,
    compute_duration_us: IntCounter,
    queue_duration_us: IntCounter,
}

impl MetricReporter {
    pub fn record_success(&self, batch_size: u32, request: Duration, compute: Duration, queue: Duration) {
        self.request_success.inc();
        self.execution_count.inc();
        self.inference_count.inc_by(u64::from(batch_size));
        self.request_duration_us.inc_by(request.as_micros() as u64);
        self.compute_duration_us.inc_by(compute.as_micros() as u64);
        self.queue_duration_us.inc_by(queue.as_micros() as u64);
    }

    pub fn record_failure(&self, request: Duration) {
        self.request_failure.inc();
        self.request_duration_us.inc_by(request.as_micros() as u64);
    }
}
