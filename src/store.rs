use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{Delivery, DeliveryId, DeliveryStatus, EndpointId};

/// Persistence seam for delivery attempt records.
///
/// Records are append/update-by-id; a delivery is owned by exactly one
/// worker at a time, so same-id writes never race. The in-memory
/// implementation is authoritative for queries; external backends mirror it
/// best-effort.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist a newly created record.
    async fn insert(&self, delivery: &Delivery);

    /// Persist a state transition of an existing record.
    async fn update(&self, delivery: &Delivery);

    /// Fetch one record by id.
    async fn get(&self, id: &DeliveryId) -> Option<Delivery>;

    /// Delivery history for an endpoint, newest first.
    async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
        offset: usize,
    ) -> Vec<Delivery>;

    /// Records for an endpoint created at or after `since_secs` (stats scans).
    async fn deliveries_since(&self, endpoint_id: &EndpointId, since_secs: u64) -> Vec<Delivery>;

    /// All records still in `Pending` (startup recovery scan).
    async fn load_pending(&self) -> Vec<Delivery>;
}

/// In-memory store for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<DeliveryId, Delivery>>,
    // Per-endpoint insertion order, for stable history pagination.
    by_endpoint: Mutex<HashMap<EndpointId, Vec<DeliveryId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn insert(&self, delivery: &Delivery) {
        let mut records = self.records.lock().await;
        let mut by_endpoint = self.by_endpoint.lock().await;
        by_endpoint
            .entry(delivery.endpoint_id.clone())
            .or_default()
            .push(delivery.id.clone());
        records.insert(delivery.id.clone(), delivery.clone());
    }

    async fn update(&self, delivery: &Delivery) {
        self.records
            .lock()
            .await
            .insert(delivery.id.clone(), delivery.clone());
    }

    async fn get(&self, id: &DeliveryId) -> Option<Delivery> {
        self.records.lock().await.get(id).cloned()
    }

    async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
        offset: usize,
    ) -> Vec<Delivery> {
        let records = self.records.lock().await;
        let by_endpoint = self.by_endpoint.lock().await;
        let Some(ids) = by_endpoint.get(endpoint_id) else {
            return Vec::new();
        };
        ids.iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| records.get(id).cloned())
            .collect()
    }

    async fn deliveries_since(&self, endpoint_id: &EndpointId, since_secs: u64) -> Vec<Delivery> {
        let records = self.records.lock().await;
        let by_endpoint = self.by_endpoint.lock().await;
        let Some(ids) = by_endpoint.get(endpoint_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| records.get(id))
            .filter(|d| d.created_at >= since_secs)
            .cloned()
            .collect()
    }

    async fn load_pending(&self) -> Vec<Delivery> {
        self.records
            .lock()
            .await
            .values()
            .filter(|d| d.status == DeliveryStatus::Pending)
            .cloned()
            .collect()
    }
}
