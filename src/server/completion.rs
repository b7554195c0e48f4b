//! Completed responses and in-flight request tracking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{Result, Status};
use crate::protocol::InferResponseHeader;
use crate::provider::InferResponseProvider;

/// The outcome of one accepted submission, handed to its completion callback.
#[derive(Debug)]
pub struct InferResponse {
    status: Result<()>,
    provider: Option<InferResponseProvider>,
}

impl InferResponse {
    pub(crate) fn new(status: Result<()>, provider: InferResponseProvider) -> Self {
        Self {
            status,
            provider: Some(provider),
        }
    }

    /// A response with no outputs at all.
    pub(crate) fn failed(status: Status) -> Self {
        Self {
            status: Err(status),
            provider: None,
        }
    }

    /// Whether execution succeeded.
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    /// The response header, or the execution failure.
    pub fn header(&self) -> Result<&InferResponseHeader> {
        self.status.clone()?;
        self.provider
            .as_ref()
            .map(InferResponseProvider::response_header)
            .ok_or_else(|| Status::internal("response has no header"))
    }

    /// Contents of output `name`, valid for the response's lifetime.
    pub fn output_data(&self, name: &str) -> Result<&[u8]> {
        self.status.clone()?;
        self.provider
            .as_ref()
            .ok_or_else(|| Status::not_found(format!("output '{name}' was not produced")))?
            .output_buffer_contents(name)
    }
}

/// Counts submissions whose callbacks have not run yet.
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: AtomicUsize,
    idle: Notify,
}

impl InflightTracker {
    pub fn enter(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InflightGuard(self.clone())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once no submission is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps one submission counted until dropped.
#[derive(Debug)]
pub struct InflightGuard(Arc<InflightTracker>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Code;

    #[test]
    fn test_failed_response_hides_outputs() {
        let response = InferResponse::failed(Status::internal("boom"));
        assert_eq!(response.status().unwrap_err().code(), Code::Internal);
        assert_eq!(response.header().unwrap_err().message(), "boom");
        assert_eq!(response.output_data("OUT").unwrap_err().code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_wait_idle_after_last_guard() {
        let tracker = Arc::new(InflightTracker::default());
        let guard = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.count(), 2);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.count(), 0);
    }
}
