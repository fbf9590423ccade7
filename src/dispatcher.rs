//! Event dispatch, scheduling, and the public service surface.
//!
//! `Courier` owns the whole pipeline: it resolves matching endpoints,
//! persists signed `Pending` records, and feeds them to a fixed worker
//! pool through a bounded queue. A scheduler task interleaves first
//! attempts with due retries (held in a min-heap keyed by release time) so
//! neither starves the other, and applies the retry state machine to
//! worker reports.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::DispatchError;
use crate::health;
use crate::registry::EndpointRegistry;
use crate::retry::RetryPolicy;
use crate::signing;
use crate::stats::{DeliveryStats, StatsAggregator};
use crate::store::{DeliveryStore, InMemoryStore};
use crate::types::{
    unix_now_secs, Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, Event, NewEndpoint,
};
use crate::worker::{worker_loop, DeliveryReport, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Tuning knobs for the delivery service.
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Number of delivery workers.
    pub worker_count: usize,

    /// Capacity of the inbound and ready queues. Dispatch fails fast with
    /// `QueueFull` once the inbound queue is at capacity.
    pub queue_capacity: usize,

    /// Retry delay table and jitter.
    pub retry_policy: RetryPolicy,

    /// Consecutive failures at which the health monitor disables an
    /// endpoint.
    pub disable_threshold: u32,

    /// How often the health monitor scans.
    pub health_interval: Duration,

    /// TTL of the registry's subscription index cache.
    pub registry_cache_ttl: Duration,

    /// TTL of cached stats results.
    pub stats_cache_ttl: Duration,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 1_024,
            retry_policy: RetryPolicy::default(),
            disable_threshold: 20,
            health_interval: Duration::from_secs(300),
            registry_cache_ttl: Duration::from_secs(30),
            stats_cache_ttl: Duration::from_secs(10),
        }
    }
}

enum SchedulerCommand {
    /// Put a persisted `Pending` record into the delay queue (startup
    /// recovery of scheduled retries).
    Schedule(Delivery),

    /// Release a scheduled retry immediately, ignoring its delay.
    RetryNow(DeliveryId),
}

/// The outbound webhook delivery service.
pub struct Courier {
    registry: Arc<EndpointRegistry>,
    store: Arc<dyn DeliveryStore>,
    stats: StatsAggregator,
    immediate_tx: Option<mpsc::Sender<Delivery>>,
    command_tx: mpsc::Sender<SchedulerCommand>,
    is_running: Arc<AtomicBool>,
    worker_handles: Vec<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
    health_handle: Option<JoinHandle<()>>,
    health_shutdown: Arc<Notify>,
}

impl Courier {
    /// Start the service with an in-memory record store.
    pub fn new(config: CourierConfig) -> Self {
        Self::build(config, Arc::new(InMemoryStore::new()))
    }

    /// Start the service against an existing record store and replay any
    /// `Pending` records left behind by a previous run: past-due ones go
    /// straight to the workers, future-scheduled retries back into the
    /// delay queue.
    pub async fn with_store(config: CourierConfig, store: Arc<dyn DeliveryStore>) -> Self {
        let courier = Self::build(config, store.clone());

        let now = unix_now_secs();
        for delivery in store.load_pending().await {
            match delivery.next_retry_at {
                Some(at) if at > now => {
                    let _ = courier
                        .command_tx
                        .send(SchedulerCommand::Schedule(delivery))
                        .await;
                }
                _ => {
                    if let Some(tx) = &courier.immediate_tx {
                        let _ = tx.send(delivery).await;
                    }
                }
            }
        }
        courier
    }

    fn build(config: CourierConfig, store: Arc<dyn DeliveryStore>) -> Self {
        let registry = Arc::new(EndpointRegistry::new(config.registry_cache_ttl));
        let stats = StatsAggregator::new(store.clone(), config.stats_cache_ttl);

        let capacity = config.queue_capacity.max(1);
        let (immediate_tx, immediate_rx) = mpsc::channel(capacity);
        let (ready_tx, ready_rx) = mpsc::channel(capacity);
        let (report_tx, report_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(64);

        let ctx = Arc::new(WorkerContext {
            registry: registry.clone(),
            store: store.clone(),
            report_tx,
            http_client: reqwest::Client::new(),
        });

        let shared_ready_rx = Arc::new(Mutex::new(ready_rx));
        let mut worker_handles = Vec::with_capacity(config.worker_count.max(1));
        for _ in 0..config.worker_count.max(1) {
            worker_handles.push(tokio::spawn(worker_loop(
                shared_ready_rx.clone(),
                ctx.clone(),
            )));
        }

        let scheduler_handle = tokio::spawn(scheduler_loop(
            immediate_rx,
            report_rx,
            command_rx,
            ready_tx,
            registry.clone(),
            store.clone(),
            config.retry_policy.clone(),
        ));

        let health_shutdown = Arc::new(Notify::new());
        let health_handle = tokio::spawn(health::run_monitor(
            registry.clone(),
            config.disable_threshold,
            config.health_interval,
            health_shutdown.clone(),
        ));

        Self {
            registry,
            store,
            stats,
            immediate_tx: Some(immediate_tx),
            command_tx,
            is_running: Arc::new(AtomicBool::new(true)),
            worker_handles,
            scheduler_handle: Some(scheduler_handle),
            health_handle: Some(health_handle),
            health_shutdown,
        }
    }

    /// Register a new endpoint.
    pub async fn register_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, DispatchError> {
        self.registry.register(new).await
    }

    /// Snapshot of one endpoint, counters included.
    pub async fn endpoint(&self, id: &EndpointId) -> Option<Endpoint> {
        self.registry.get(id).await
    }

    /// Stop routing new deliveries to an endpoint.
    pub async fn deactivate_endpoint(&self, id: &EndpointId) -> Result<(), DispatchError> {
        self.registry.deactivate(id).await
    }

    /// Issue a fresh signing secret for an endpoint.
    pub async fn rotate_endpoint_secret(&self, id: &EndpointId) -> Result<String, DispatchError> {
        self.registry.rotate_secret(id).await
    }

    /// Fan an event out to every matching endpoint.
    ///
    /// Returns the created delivery ids; an event no endpoint matches
    /// returns an empty list. Fails fast with `QueueFull` when the inbound
    /// queue is at capacity — deliveries enqueued before that stay queued.
    pub async fn dispatch(&self, event: Event) -> Result<Vec<DeliveryId>, DispatchError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(DispatchError::Shutdown);
        }
        let Some(immediate_tx) = &self.immediate_tx else {
            return Err(DispatchError::Shutdown);
        };

        let matched = self
            .registry
            .find_matching(
                event.event_type,
                &event.context,
                event.organization_id.as_ref(),
            )
            .await;
        if matched.is_empty() {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no matching endpoints"
            );
            return Ok(Vec::new());
        }

        let now = unix_now_secs();
        let mut ids = Vec::with_capacity(matched.len());
        for endpoint in matched {
            let signed = signing::build_signed_request(
                &endpoint.secret,
                event.event_type,
                now,
                &event.payload,
            );
            let delivery = Delivery {
                id: DeliveryId::generate(),
                endpoint_id: endpoint.id.clone(),
                event_id: event.id.clone(),
                event_type: event.event_type,
                request_url: endpoint.url.clone(),
                request_headers: signed.headers,
                request_body: signed.body,
                attempt_number: 1,
                status: DeliveryStatus::Pending,
                response_status: None,
                response_body: None,
                duration_ms: None,
                error: None,
                created_at: now,
                next_retry_at: None,
                max_retries_reached: false,
            };
            let delivery_id = delivery.id.clone();

            // Persisted before it is queued: a crash between the two leaves
            // a replayable Pending record, not a lost event.
            self.store.insert(&delivery).await;

            match immediate_tx.try_send(delivery) {
                Ok(()) => {
                    metric_inc("webhook.dispatch.enqueued");
                    ids.push(delivery_id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metric_inc("webhook.dispatch.backpressure");
                    tracing::warn!(
                        event_id = %event.id,
                        endpoint_id = %endpoint.id,
                        "inbound queue at capacity; rejecting dispatch"
                    );
                    return Err(DispatchError::QueueFull);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(DispatchError::Shutdown);
                }
            }
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            fan_out = ids.len(),
            "event dispatched"
        );
        Ok(ids)
    }

    /// Delivery history for an endpoint, newest first.
    pub async fn list_deliveries(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
        offset: usize,
    ) -> Vec<Delivery> {
        self.store.list_for_endpoint(endpoint_id, limit, offset).await
    }

    /// One delivery record.
    pub async fn delivery(&self, id: &DeliveryId) -> Option<Delivery> {
        self.store.get(id).await
    }

    /// Rolling statistics over the last `period`.
    pub async fn endpoint_stats(&self, id: &EndpointId, period: Duration) -> DeliveryStats {
        self.stats.endpoint_stats(id, period).await
    }

    /// Release a scheduled retry immediately instead of waiting out its
    /// delay. Returns `false` for delivered, exhausted, unscheduled, or
    /// unknown deliveries.
    pub async fn retry_now(&self, id: &DeliveryId) -> bool {
        let Some(delivery) = self.store.get(id).await else {
            return false;
        };
        if delivery.status != DeliveryStatus::Pending || delivery.next_retry_at.is_none() {
            return false;
        }
        self.command_tx
            .send(SchedulerCommand::RetryNow(id.clone()))
            .await
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop accepting events and drain the pipeline.
    ///
    /// In-flight and already-queued deliveries complete; retries still
    /// waiting out their delay stay persisted as `Pending` and are picked
    /// up by `with_store` on the next start.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.immediate_tx.take();
        self.health_shutdown.notify_waiters();

        if let Some(handle) = self.health_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

struct ScheduledRetry {
    ready_at: Instant,
    delivery: Delivery,
}

impl Eq for ScheduledRetry {}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at.eq(&other.ready_at)
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

async fn scheduler_loop(
    mut immediate_rx: mpsc::Receiver<Delivery>,
    mut report_rx: mpsc::Receiver<DeliveryReport>,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    ready_tx: mpsc::Sender<Delivery>,
    registry: Arc<EndpointRegistry>,
    store: Arc<dyn DeliveryStore>,
    policy: RetryPolicy,
) {
    let mut delay_heap: BinaryHeap<ScheduledRetry> = BinaryHeap::new();
    // Delivery ids currently sitting in the delay heap. One scheduled
    // retry per id, ever.
    let mut scheduled: HashSet<DeliveryId> = HashSet::new();
    let mut ready_tx = Some(ready_tx);
    let mut immediate_open = true;
    let mut command_open = true;

    loop {
        // Release every due retry before touching the inbound queue, so a
        // burst of first attempts cannot starve retries.
        let now = Instant::now();
        while delay_heap.peek().is_some_and(|t| t.ready_at <= now) {
            let Some(entry) = delay_heap.pop() else { break };
            scheduled.remove(&entry.delivery.id);
            if let Some(tx) = &ready_tx {
                if tx.send(entry.delivery).await.is_err() {
                    return;
                }
            }
        }

        let next_ready = delay_heap.peek().map(|t| t.ready_at);
        let wake_at = next_ready.unwrap_or_else(|| now + Duration::from_secs(60));

        tokio::select! {
            biased;

            report = report_rx.recv() => {
                match report {
                    Some(report) => {
                        handle_report(
                            report,
                            &registry,
                            &store,
                            &policy,
                            &mut delay_heap,
                            &mut scheduled,
                        )
                        .await;
                    }
                    // Every worker is gone; nothing can make progress.
                    None => return,
                }
            }

            command = command_rx.recv(), if command_open => {
                match command {
                    Some(command) => {
                        handle_command(
                            command,
                            &store,
                            &mut delay_heap,
                            &mut scheduled,
                            &ready_tx,
                        )
                        .await;
                    }
                    None => command_open = false,
                }
            }

            delivery = immediate_rx.recv(), if immediate_open => {
                match delivery {
                    Some(delivery) => {
                        if let Some(tx) = &ready_tx {
                            if tx.send(delivery).await.is_err() {
                                return;
                            }
                        }
                    }
                    None => {
                        // Shutdown: close the ready queue so workers drain
                        // and exit. Retries still in the heap stay
                        // persisted for the next start.
                        immediate_open = false;
                        ready_tx = None;
                    }
                }
            }

            _ = sleep_until(wake_at), if next_ready.is_some() => {}
        }
    }
}

/// Apply the retry state machine to one worker report.
async fn handle_report(
    report: DeliveryReport,
    registry: &Arc<EndpointRegistry>,
    store: &Arc<dyn DeliveryStore>,
    policy: &RetryPolicy,
    delay_heap: &mut BinaryHeap<ScheduledRetry>,
    scheduled: &mut HashSet<DeliveryId>,
) {
    if !report.failed {
        return;
    }
    let mut failed = report.delivery;

    let Some(endpoint) = registry.get(&failed.endpoint_id).await else {
        return;
    };

    if failed.attempt_number > endpoint.max_retries {
        failed.max_retries_reached = true;
        store.update(&failed).await;
        tracing::warn!(
            delivery_id = %failed.id,
            endpoint_id = %failed.endpoint_id,
            event_id = %failed.event_id,
            attempt_number = failed.attempt_number,
            "delivery failed permanently; retries exhausted"
        );
        metric_inc("webhook.delivery.retries_exhausted");
        return;
    }

    if !endpoint.is_active {
        // The endpoint was deactivated mid-chain. The attempt that just ran
        // is recorded; the chain ends here.
        tracing::info!(
            delivery_id = %failed.id,
            endpoint_id = %failed.endpoint_id,
            "endpoint inactive; not scheduling further retries"
        );
        return;
    }

    let delay = policy.retry_delay(failed.attempt_number);
    let now_secs = unix_now_secs();
    let next = failed.next_attempt(now_secs + delay.as_secs(), now_secs);

    // Persist the fresh attempt before queueing it; a crash here is
    // recovered by replaying Pending records with a past next_retry_at.
    store.insert(&next).await;

    tracing::info!(
        delivery_id = %next.id,
        endpoint_id = %next.endpoint_id,
        event_id = %next.event_id,
        attempt_number = next.attempt_number,
        delay_ms = delay.as_millis() as u64,
        "retry scheduled"
    );
    metric_inc("webhook.delivery.retry_scheduled");

    scheduled.insert(next.id.clone());
    delay_heap.push(ScheduledRetry {
        ready_at: Instant::now() + delay,
        delivery: next,
    });
}

async fn handle_command(
    command: SchedulerCommand,
    store: &Arc<dyn DeliveryStore>,
    delay_heap: &mut BinaryHeap<ScheduledRetry>,
    scheduled: &mut HashSet<DeliveryId>,
    ready_tx: &Option<mpsc::Sender<Delivery>>,
) {
    match command {
        SchedulerCommand::Schedule(delivery) => {
            if !scheduled.insert(delivery.id.clone()) {
                return;
            }
            let delay = delivery
                .next_retry_at
                .map(|at| Duration::from_secs(at.saturating_sub(unix_now_secs())))
                .unwrap_or(Duration::ZERO);
            delay_heap.push(ScheduledRetry {
                ready_at: Instant::now() + delay,
                delivery,
            });
        }
        SchedulerCommand::RetryNow(id) => {
            if !scheduled.remove(&id) {
                return;
            }
            let entries = std::mem::take(delay_heap).into_vec();
            let mut released = None;
            for entry in entries {
                if entry.delivery.id == id {
                    released = Some(entry.delivery);
                } else {
                    delay_heap.push(entry);
                }
            }
            let Some(mut delivery) = released else { return };

            delivery.next_retry_at = Some(unix_now_secs());
            store.update(&delivery).await;
            if let Some(tx) = ready_tx {
                let _ = tx.send(delivery).await;
            }
        }
    }
}
