//! Per-endpoint delivery statistics.
//!
//! Read-only aggregation over the delivery record store. Results are
//! cached briefly so repeated operator queries do not hammer the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::store::DeliveryStore;
use crate::types::{unix_now_secs, Delivery, DeliveryStatus, EndpointId};

/// Rolling statistics for one endpoint over a query window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
    /// Delivered over completed attempts; 0.0 when nothing completed yet.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: u64,
}

impl DeliveryStats {
    fn empty() -> Self {
        Self {
            total: 0,
            delivered: 0,
            failed: 0,
            pending: 0,
            success_rate: 0.0,
            avg_duration_ms: 0.0,
            p95_duration_ms: 0,
        }
    }
}

pub struct StatsAggregator {
    store: Arc<dyn DeliveryStore>,
    cache: Mutex<HashMap<(EndpointId, u64), (Instant, DeliveryStats)>>,
    cache_ttl: Duration,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn DeliveryStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Statistics for deliveries to `endpoint_id` created within the last
    /// `period`.
    pub async fn endpoint_stats(&self, endpoint_id: &EndpointId, period: Duration) -> DeliveryStats {
        let key = (endpoint_id.clone(), period.as_secs());
        {
            let cache = self.cache.lock().await;
            if let Some((cached_at, stats)) = cache.get(&key) {
                if cached_at.elapsed() < self.cache_ttl {
                    return stats.clone();
                }
            }
        }

        let since = unix_now_secs().saturating_sub(period.as_secs());
        let deliveries = self.store.deliveries_since(endpoint_id, since).await;
        let stats = compute(&deliveries);

        self.cache
            .lock()
            .await
            .insert(key, (Instant::now(), stats.clone()));
        stats
    }
}

fn compute(deliveries: &[Delivery]) -> DeliveryStats {
    if deliveries.is_empty() {
        return DeliveryStats::empty();
    }

    let mut stats = DeliveryStats::empty();
    let mut durations: Vec<u64> = Vec::new();

    for delivery in deliveries {
        stats.total += 1;
        match delivery.status {
            DeliveryStatus::Delivered => stats.delivered += 1,
            DeliveryStatus::Failed => stats.failed += 1,
            DeliveryStatus::Pending => stats.pending += 1,
        }
        if delivery.status != DeliveryStatus::Pending {
            if let Some(ms) = delivery.duration_ms {
                durations.push(ms);
            }
        }
    }

    let completed = stats.delivered + stats.failed;
    if completed > 0 {
        stats.success_rate = stats.delivered as f64 / completed as f64;
    }

    if !durations.is_empty() {
        let sum: u64 = durations.iter().sum();
        stats.avg_duration_ms = sum as f64 / durations.len() as f64;
        durations.sort_unstable();
        let index = ((durations.len() - 1) as f64 * 0.95).round() as usize;
        stats.p95_duration_ms = durations[index];
    }

    stats
}
