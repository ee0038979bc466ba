use crate::handler::{notify_logged, Enricher, NoopEnricher, LogNotifier, Notifier};
use crate::metrics::BrokerMetrics;
use crate::queue::RequestQueue;
use link_queue_core::{AttemptOutcome, Request, RetryPolicy, Transition};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state behind both consumers: the queue, the retry policy and the
/// collaborators told about every settled attempt
pub struct Broker {
    queue: Arc<RequestQueue>,
    policy: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    enricher: Arc<dyn Enricher>,
    metrics: Arc<BrokerMetrics>,
}

impl Broker {
    pub fn new(queue: Arc<RequestQueue>, policy: RetryPolicy, metrics: Arc<BrokerMetrics>) -> Self {
        Broker {
            queue,
            policy,
            notifier: Arc::new(LogNotifier),
            enricher: Arc::new(NoopEnricher),
            metrics,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn enricher(&self) -> &dyn Enricher {
        self.enricher.as_ref()
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Accept a new request from a producer
    pub fn submit(&self, request: Request) {
        self.queue.enqueue(request);
        self.metrics.enqueued_total.inc();
        self.refresh_queue_metrics();
    }

    /// Apply the retry policy to a finished attempt. A requeued request is
    /// appended to the tail before the notifier runs.
    pub async fn settle(&self, request: Request, outcome: &AttemptOutcome) -> Transition {
        let transition = self.policy.apply(request, outcome);
        let settled = transition.request();

        match &transition {
            Transition::Completed(_) => {
                info!(request_id = %settled.id(), subject = %settled.subject_label(), "Request completed");
            }
            Transition::Requeued(r) => {
                self.queue.enqueue(r.clone());
                info!(
                    request_id = %r.id(),
                    retry_count = r.retry_count(),
                    max_retries = self.policy.max_retries(),
                    "Request re-queued for retry"
                );
            }
            Transition::Failed(_) => {
                warn!(
                    request_id = %settled.id(),
                    subject = %settled.subject_label(),
                    retry_count = settled.retry_count(),
                    "Request failed after max retries"
                );
            }
        }

        self.metrics.inc_requests_total(transition.outcome());
        self.refresh_queue_metrics();
        notify_logged(self.notifier.as_ref(), settled, transition.outcome(), outcome.detail()).await;

        transition
    }

    pub fn refresh_queue_metrics(&self) {
        self.metrics
            .update_queue(self.queue.len(), self.queue.persist_failures());
    }
}
