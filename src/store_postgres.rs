use async_trait::async_trait;
use tokio_postgres::Client;

use crate::store::DeliveryStore;
use crate::types::{Delivery, DeliveryId, DeliveryStatus, EndpointId};

/// Postgres-backed delivery record mirror.
///
/// One row per attempt record, JSONB payload, indexed for the two query
/// shapes that matter: per-endpoint history and pending-recovery scans.
/// Writes are best-effort; a failed statement degrades to a no-op.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_deliveries (
                    id TEXT PRIMARY KEY,
                    endpoint_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    payload JSONB NOT NULL
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS webhook_deliveries_endpoint_created
                 ON webhook_deliveries (endpoint_id, created_at)",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS webhook_deliveries_status
                 ON webhook_deliveries (status)",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    async fn upsert(&self, delivery: &Delivery) {
        let payload = serde_json::to_value(delivery).unwrap_or_default();
        let status = delivery.status.to_string();
        let created_at = delivery.created_at as i64;
        let _ = self
            .client
            .execute(
                "INSERT INTO webhook_deliveries (id, endpoint_id, status, created_at, payload)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (id) DO UPDATE
                 SET status = EXCLUDED.status, payload = EXCLUDED.payload",
                &[
                    &delivery.id.0,
                    &delivery.endpoint_id.0,
                    &status,
                    &created_at,
                    &payload,
                ],
            )
            .await;
    }
}

#[async_trait]
impl DeliveryStore for PostgresStore {
    async fn insert(&self, delivery: &Delivery) {
        self.upsert(delivery).await;
    }

    async fn update(&self, delivery: &Delivery) {
        self.upsert(delivery).await;
    }

    async fn get(&self, id: &DeliveryId) -> Option<Delivery> {
        let row = self
            .client
            .query_opt("SELECT payload FROM webhook_deliveries WHERE id = $1", &[&id.0])
            .await
            .ok()??;
        let payload: serde_json::Value = row.try_get(0).ok()?;
        serde_json::from_value(payload).ok()
    }

    async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
        offset: usize,
    ) -> Vec<Delivery> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM webhook_deliveries
                 WHERE endpoint_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2 OFFSET $3",
                &[&endpoint_id.0, &(limit as i64), &(offset as i64)],
            )
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|v| serde_json::from_value::<Delivery>(v).ok())
            .collect()
    }

    async fn deliveries_since(&self, endpoint_id: &EndpointId, since_secs: u64) -> Vec<Delivery> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM webhook_deliveries
                 WHERE endpoint_id = $1 AND created_at >= $2",
                &[&endpoint_id.0, &(since_secs as i64)],
            )
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|v| serde_json::from_value::<Delivery>(v).ok())
            .collect()
    }

    async fn load_pending(&self) -> Vec<Delivery> {
        let pending = DeliveryStatus::Pending.to_string();
        let rows = self
            .client
            .query(
                "SELECT payload FROM webhook_deliveries WHERE status = $1",
                &[&pending],
            )
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|v| serde_json::from_value::<Delivery>(v).ok())
            .collect()
    }
}
