//! Delivery worker pool.
//!
//! A fixed set of workers pulls ready deliveries from a shared queue. Each
//! worker performs one HTTP POST bounded by the endpoint timeout,
//! classifies the outcome, persists the record and updates the endpoint
//! counters before taking its next job, then reports to the scheduler for
//! the retry decision.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::error::FailureKind;
use crate::registry::EndpointRegistry;
use crate::store::DeliveryStore;
use crate::types::{Delivery, DeliveryStatus};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Response bodies are captured for operator inspection, truncated to keep
/// records bounded.
const RESPONSE_BODY_LIMIT: usize = 4096;

/// Outcome of one processed delivery, handed back to the scheduler.
#[derive(Debug)]
pub(crate) struct DeliveryReport {
    pub delivery: Delivery,
    pub failed: bool,
}

/// Shared context for all workers.
pub(crate) struct WorkerContext {
    pub registry: Arc<EndpointRegistry>,
    pub store: Arc<dyn DeliveryStore>,
    pub report_tx: mpsc::Sender<DeliveryReport>,
    pub http_client: reqwest::Client,
}

/// Main worker loop: dequeue, deliver, persist, report.
pub(crate) async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let delivery = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(delivery) = delivery else { break };

        let report = process_delivery(delivery, &ctx).await;
        let _ = ctx.report_tx.send(report).await;
    }
}

/// Perform one delivery attempt and persist its outcome.
async fn process_delivery(mut delivery: Delivery, ctx: &WorkerContext) -> DeliveryReport {
    // Endpoints are never deleted, only deactivated; the default only
    // covers a registry that was rebuilt without this endpoint.
    let timeout = ctx
        .registry
        .get(&delivery.endpoint_id)
        .await
        .map(|e| e.timeout)
        .unwrap_or(Duration::from_secs(5));

    let start = Instant::now();
    let outcome = attempt(&ctx.http_client, &delivery, timeout).await;
    delivery.duration_ms = Some(start.elapsed().as_millis() as u64);

    match outcome {
        Ok((status, body)) => {
            delivery.status = DeliveryStatus::Delivered;
            delivery.response_status = Some(status);
            delivery.response_body = Some(body);
            delivery.error = None;

            ctx.store.update(&delivery).await;
            ctx.registry.record_success(&delivery.endpoint_id).await;

            tracing::info!(
                delivery_id = %delivery.id,
                endpoint_id = %delivery.endpoint_id,
                event_id = %delivery.event_id,
                event_type = %delivery.event_type,
                attempt_number = delivery.attempt_number,
                response_status = status,
                duration_ms = delivery.duration_ms,
                "delivery succeeded"
            );
            metric_inc("webhook.delivery.delivered");

            DeliveryReport {
                delivery,
                failed: false,
            }
        }
        Err((kind, status, body)) => {
            delivery.status = DeliveryStatus::Failed;
            delivery.response_status = status;
            delivery.response_body = body;
            delivery.error = Some(kind.to_string());

            ctx.store.update(&delivery).await;
            ctx.registry.record_failure(&delivery.endpoint_id).await;

            tracing::warn!(
                delivery_id = %delivery.id,
                endpoint_id = %delivery.endpoint_id,
                event_id = %delivery.event_id,
                event_type = %delivery.event_type,
                attempt_number = delivery.attempt_number,
                error = %kind,
                duration_ms = delivery.duration_ms,
                "delivery attempt failed"
            );
            metric_inc("webhook.delivery.failed");

            DeliveryReport {
                delivery,
                failed: true,
            }
        }
    }
}

/// One HTTP POST with the delivery's stored headers and body.
///
/// A 2xx response is a success; any other status, a timeout, or a
/// connection error is a failure for this attempt.
async fn attempt(
    client: &reqwest::Client,
    delivery: &Delivery,
    timeout: Duration,
) -> Result<(u16, String), (FailureKind, Option<u16>, Option<String>)> {
    let mut request = client
        .post(&delivery.request_url)
        .timeout(timeout)
        .body(delivery.request_body.clone());
    for (name, value) in &delivery.request_headers {
        request = request.header(name.as_str(), value.as_str());
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(RESPONSE_BODY_LIMIT)
                .collect();

            if status.is_success() {
                Ok((status.as_u16(), body))
            } else {
                Err((
                    FailureKind::Status(status.as_u16()),
                    Some(status.as_u16()),
                    Some(body),
                ))
            }
        }
        Err(err) if err.is_timeout() => Err((FailureKind::Timeout, None, None)),
        Err(_) => Err((FailureKind::Connection, None, None)),
    }
}
