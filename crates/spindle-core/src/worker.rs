//! Worker: drains a queue into a sink, one bounded tick at a time.
//!
//! Per claimed item:
//! 1. dead-letter it if its retry budget is spent
//! 2. decode and validate the payload
//! 3. hand valid items to the sink, then delete them
//! 4. release failed items (with backoff) once the tick is over
//!
//! Per-item failures never end a tick. Storage failures do, and surface to
//! whoever called `tick`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::domain::{FeedItem, InvalidReason, Validation};
use crate::error::{QueueError, Result};
use crate::observability::{Outcome, TickReport};
use crate::ports::Sink;
use crate::queue::{ClaimedItem, DEFAULT_LEASE, QueueHandle, RetryPolicy};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What to do with an item whose payload fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidPayloadPolicy {
    /// Delete it; malformed data does not get better by retrying.
    #[default]
    Discard,
    /// Keep the lease and let it lapse, so the item is retried later.
    LeaveLeased,
}

/// Upper bound on the work done in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    pub max_items: usize,
    pub max_duration: Duration,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            max_items: 100,
            max_duration: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Lease taken on each claimed item.
    pub lease: Duration,
    pub budget: TickBudget,
    pub retry: RetryPolicy,
    pub invalid_payload: InvalidPayloadPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            budget: TickBudget::default(),
            retry: RetryPolicy::default(),
            invalid_payload: InvalidPayloadPolicy::default(),
        }
    }
}

/// A queue consumer. Cloning is cheap; clones share the queue and the sink.
#[derive(Clone)]
pub struct Worker {
    queue: QueueHandle,
    sink: Arc<dyn Sink>,
    config: WorkerConfig,
}

/// Items that failed this tick, released when the tick ends so the same
/// tick does not pick them straight back up.
type Deferred = Vec<(ClaimedItem, Duration)>;

impl Worker {
    pub fn new(queue: QueueHandle, sink: Arc<dyn Sink>) -> Self {
        Self::with_config(queue, sink, WorkerConfig::default())
    }

    pub fn with_config(queue: QueueHandle, sink: Arc<dyn Sink>, config: WorkerConfig) -> Self {
        Self {
            queue,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process items until the queue is empty, the budget is spent, or
    /// shutdown is requested. Shutdown is only checked between items.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut deferred = Deferred::new();

        let drained = self.drain(shutdown, &mut report, &mut deferred).await;
        let released = self.release_deferred(deferred).await;
        drained?;
        released?;

        debug!(
            queue = %self.queue.name(),
            claimed = report.claimed,
            persisted = report.persisted,
            "tick finished"
        );
        Ok(report)
    }

    async fn drain(
        &self,
        shutdown: &watch::Receiver<bool>,
        report: &mut TickReport,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let budget = self.config.budget;
        let started = Instant::now();
        while report.claimed < budget.max_items as u64 && started.elapsed() < budget.max_duration {
            if *shutdown.borrow() {
                debug!(queue = %self.queue.name(), "shutdown requested, ending tick");
                break;
            }
            let Some(item) = self.queue.claim_item_for(self.config.lease).await? else {
                break;
            };
            report.claimed += 1;

            let span = info_span!(
                "process_item",
                queue = %self.queue.name(),
                item_id = %item.id,
                attempt = item.attempts,
                title = tracing::field::Empty,
            );
            let outcome = self.process(&item, deferred).instrument(span).await?;
            report.record(outcome);
        }
        Ok(())
    }

    async fn process(&self, item: &ClaimedItem, deferred: &mut Deferred) -> Result<Outcome> {
        if self.config.retry.is_exhausted(item.attempts) {
            if !self.settle(self.queue.delete_item(item).await)? {
                return Ok(self.lease_lost());
            }
            warn!(outcome = Outcome::DeadLettered.as_str(), "retry budget spent, item dropped");
            return Ok(Outcome::DeadLettered);
        }

        let validation = match item.decode::<FeedItem>() {
            Ok(feed) => {
                if let Some(title) = feed.title.as_deref() {
                    Span::current().record("title", title);
                }
                feed.validate()
            }
            Err(err) => Validation::Invalid(InvalidReason::Undecodable(err.to_string())),
        };

        let valid = match validation {
            Validation::Valid(valid) => valid,
            Validation::Invalid(reason) => {
                warn!(outcome = Outcome::Invalid.as_str(), %reason, "invalid payload");
                if self.config.invalid_payload == InvalidPayloadPolicy::Discard
                    && !self.settle(self.queue.delete_item(item).await)?
                {
                    return Ok(self.lease_lost());
                }
                return Ok(Outcome::Invalid);
            }
        };

        match self.sink.persist(item.id, &valid).await {
            Ok(record_id) => {
                if !self.settle(self.queue.delete_item(item).await)? {
                    // the record exists; whoever re-claims the item will hand
                    // the same item id to the sink again
                    return Ok(self.lease_lost());
                }
                info!(
                    outcome = Outcome::Persisted.as_str(),
                    %record_id,
                    "item persisted"
                );
                Ok(Outcome::Persisted)
            }
            Err(err) => {
                let delay = self.config.retry.next_delay(item.attempts);
                warn!(
                    outcome = Outcome::SinkFailed.as_str(),
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "sink failed, item will be retried"
                );
                deferred.push((item.clone(), delay));
                Ok(Outcome::SinkFailed)
            }
        }
    }

    /// `Ok(true)` if the queue operation went through, `Ok(false)` if our
    /// lease went stale first, `Err` for anything else.
    fn settle(&self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_stale_lease() => {
                debug!(error = %err, "lease went stale before settling");
                Ok(false)
            }
            Err(err) => {
                error!(error = %err, "queue storage failed while settling item");
                Err(err)
            }
        }
    }

    fn lease_lost(&self) -> Outcome {
        warn!(outcome = Outcome::LeaseLost.as_str(), "lease lapsed before the item was settled");
        Outcome::LeaseLost
    }

    async fn release_deferred(&self, deferred: Deferred) -> Result<()> {
        let mut first_err: Option<QueueError> = None;
        for (item, delay) in deferred {
            if let Err(err) = self.queue.release_item_after(&item, delay).await {
                error!(item_id = %item.id, error = %err, "could not release item");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Worker group handle.
/// - `request_shutdown` stops every worker after its current item
/// - `shutdown_and_join` waits for all of them and returns their totals
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<TickReport>>,
}

impl WorkerGroup {
    /// Spawn `n` workers, each ticking every `interval`.
    pub fn spawn(n: usize, worker: Worker, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = interval.max(MIN_INTERVAL);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = worker.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, worker, interval, &mut rx).await
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    /// In-flight items are finished; no new ones are claimed.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers. Returns the combined tick totals.
    pub async fn shutdown_and_join(self) -> TickReport {
        self.request_shutdown();
        let mut totals = TickReport::default();
        for join in self.joins {
            match join.await {
                Ok(report) => totals.merge(&report),
                Err(err) => error!(error = %err, "worker task panicked"),
            }
        }
        totals
    }
}

async fn worker_loop(
    worker_id: usize,
    worker: Worker,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> TickReport {
    let mut totals = TickReport::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: nobody can stop us any more, so stop now
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match worker.tick(shutdown_rx).await {
            Ok(report) => {
                if report.claimed > 0 {
                    info!(
                        worker_id,
                        claimed = report.claimed,
                        persisted = report.persisted,
                        invalid = report.invalid,
                        sink_failures = report.sink_failures,
                        dead_lettered = report.dead_lettered,
                        lost_leases = report.lost_leases,
                        "tick finished"
                    );
                }
                totals.merge(&report);
            }
            Err(err) => error!(worker_id, error = %err, "tick aborted"),
        }
    }

    debug!(worker_id, "worker stopped");
    totals
}
