//! Endpoint health monitor.
//!
//! The circuit breaker for chronically broken receivers: on a fixed
//! interval, any active endpoint whose consecutive-failure streak has
//! reached the threshold is deactivated. The monitor only disables;
//! bringing an endpoint back is an operator action.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::registry::EndpointRegistry;

pub(crate) async fn run_monitor(
    registry: Arc<EndpointRegistry>,
    disable_threshold: u32,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately once; the first real scan waits a period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                scan(&registry, disable_threshold).await;
            }
        }
    }
}

/// One scan pass. Returns how many endpoints were disabled.
pub(crate) async fn scan(registry: &EndpointRegistry, disable_threshold: u32) -> usize {
    let mut disabled = 0;
    for endpoint in registry.active_endpoints().await {
        if endpoint.consecutive_failures >= disable_threshold {
            if registry.deactivate(&endpoint.id).await.is_ok() {
                tracing::warn!(
                    endpoint_id = %endpoint.id,
                    url = %endpoint.url,
                    consecutive_failures = endpoint.consecutive_failures,
                    threshold = disable_threshold,
                    "disabling endpoint after consecutive delivery failures"
                );
                disabled += 1;
            }
        }
    }
    disabled
}
