//! Timer-driven consumer that drains the queue while the linking worker is
//! reachable.
//!
//! Each cycle probes availability first. An unavailable worker skips the
//! cycle. Otherwise requests are dequeued one at a time, attempted through
//! the [`AttemptExecutor`], and settled by the [`Broker`]. A request that is
//! requeued lands at the tail and may be attempted again in the same cycle.
//!
//! Shutdown is two-phase: `stop` ends the schedule and prevents new items
//! from starting; `abandon` (after the grace period) cancels the in-flight
//! attempt and returns its request to the queue unchanged.

use crate::broker::Broker;
use crate::executor::AttemptExecutor;
use crate::probe::AvailabilityProbe;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for an abandoned attempt to hand its request back
const ABANDON_WAIT: Duration = Duration::from_secs(1);

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub available: bool,
    pub attempted: usize,
}

pub struct QueueProcessor {
    broker: Arc<Broker>,
    probe: Arc<dyn AvailabilityProbe>,
    executor: AttemptExecutor,
    check_interval: Duration,
    item_delay: Duration,
    stop: CancellationToken,
    abandon: CancellationToken,
}

impl QueueProcessor {
    pub fn new(
        broker: Arc<Broker>,
        probe: Arc<dyn AvailabilityProbe>,
        executor: AttemptExecutor,
        check_interval: Duration,
        item_delay: Duration,
    ) -> Self {
        QueueProcessor {
            broker,
            probe,
            executor,
            check_interval: check_interval.max(Duration::from_millis(1)),
            item_delay,
            stop: CancellationToken::new(),
            abandon: CancellationToken::new(),
        }
    }

    /// Run one probe-then-drain pass
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let queue = self.broker.queue();

        let available = self.probe.is_available().await;
        self.broker.metrics().inc_probe_checks(available);

        if !available {
            info!(depth = queue.len(), "Linking worker unavailable, skipping queue processing");
            return CycleReport {
                available,
                attempted: 0,
            };
        }

        let mut attempted = 0;
        while !self.stop.is_cancelled() {
            let Some(request) = queue.dequeue() else {
                break;
            };
            attempted += 1;
            debug!(request_id = %request.id(), attempted, remaining = queue.len(), "Processing request");

            let outcome = tokio::select! {
                outcome = self.executor.execute(&request) => Some(outcome),
                _ = self.abandon.cancelled() => None,
            };
            let Some(outcome) = outcome else {
                warn!(request_id = %request.id(), "Abandoning in-flight attempt, returning request to queue");
                queue.enqueue(request);
                break;
            };

            self.broker.settle(request, &outcome).await;

            if queue.is_empty() {
                break;
            }
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.item_delay) => {}
            }
        }

        let elapsed = started.elapsed();
        self.broker.metrics().observe_cycle_duration(elapsed.as_secs_f64());
        if attempted > 0 {
            info!(attempted, remaining = queue.len(), ?elapsed, "Finished processing queue");
        } else {
            debug!("No requests to process");
        }

        CycleReport {
            available,
            attempted,
        }
    }

    /// Spawn the schedule. The first cycle runs immediately.
    pub fn start(self) -> ProcessorHandle {
        let stop = self.stop.clone();
        let abandon = self.abandon.clone();
        let processor = Arc::new(self);

        info!(interval = ?processor.check_interval, "Starting queue processor");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(processor.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = processor.stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(panic) = AssertUnwindSafe(processor.run_cycle()).catch_unwind().await {
                    error!("Queue processing cycle panicked: {}", panic_message(panic.as_ref()));
                }
            }

            info!("Queue processor stopped");
        });

        ProcessorHandle { stop, abandon, task }
    }
}

/// Handle to a running processor
pub struct ProcessorHandle {
    stop: CancellationToken,
    abandon: CancellationToken,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Stop the schedule, give the in-flight item up to `grace` to finish,
    /// then abandon it
    pub async fn shutdown(self, grace: Duration) {
        info!(?grace, "Shutting down queue processor");
        self.stop.cancel();

        let mut task = self.task;
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Queue processor task failed: {}", e),
            Err(_) => {
                warn!("Queue processor did not finish within {:?}", grace);
                self.abandon.cancel();
                if timeout(ABANDON_WAIT, &mut task).await.is_err() {
                    task.abort();
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
