use async_trait::async_trait;
use redis::AsyncCommands;

use crate::store::DeliveryStore;
use crate::types::{Delivery, DeliveryId, DeliveryStatus, EndpointId};

/// Redis-backed delivery record mirror.
///
/// Records live in a hash keyed by delivery id; a per-endpoint list keeps
/// insertion order for history pagination. Writes are best-effort: a
/// connection failure degrades to a no-op rather than stalling delivery.
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn records_key(&self) -> String {
        format!("{}:deliveries", self.prefix)
    }

    fn endpoint_key(&self, endpoint_id: &EndpointId) -> String {
        format!("{}:endpoint:{}", self.prefix, endpoint_id.0)
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.ok()
    }

    async fn fetch(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &DeliveryId,
    ) -> Option<Delivery> {
        let raw: Option<String> = conn.hget(self.records_key(), &id.0).await.ok()?;
        serde_json::from_str(&raw?).ok()
    }
}

#[async_trait]
impl DeliveryStore for RedisStore {
    async fn insert(&self, delivery: &Delivery) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let payload = serde_json::to_string(delivery).unwrap_or_default();
        let _: redis::RedisResult<()> =
            conn.hset(self.records_key(), &delivery.id.0, payload).await;
        let _: redis::RedisResult<()> = conn
            .rpush(self.endpoint_key(&delivery.endpoint_id), &delivery.id.0)
            .await;
    }

    async fn update(&self, delivery: &Delivery) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let payload = serde_json::to_string(delivery).unwrap_or_default();
        let _: redis::RedisResult<()> =
            conn.hset(self.records_key(), &delivery.id.0, payload).await;
    }

    async fn get(&self, id: &DeliveryId) -> Option<Delivery> {
        let mut conn = self.connection().await?;
        self.fetch(&mut conn, id).await
    }

    async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
        offset: usize,
    ) -> Vec<Delivery> {
        let Some(mut conn) = self.connection().await else {
            return Vec::new();
        };
        let ids: Vec<String> = conn
            .lrange(self.endpoint_key(endpoint_id), 0, -1)
            .await
            .unwrap_or_default();

        let mut deliveries = Vec::new();
        for id in ids.into_iter().rev().skip(offset).take(limit) {
            if let Some(delivery) = self.fetch(&mut conn, &DeliveryId(id)).await {
                deliveries.push(delivery);
            }
        }
        deliveries
    }

    async fn deliveries_since(&self, endpoint_id: &EndpointId, since_secs: u64) -> Vec<Delivery> {
        let Some(mut conn) = self.connection().await else {
            return Vec::new();
        };
        let ids: Vec<String> = conn
            .lrange(self.endpoint_key(endpoint_id), 0, -1)
            .await
            .unwrap_or_default();

        let mut deliveries = Vec::new();
        for id in ids {
            if let Some(delivery) = self.fetch(&mut conn, &DeliveryId(id)).await {
                if delivery.created_at >= since_secs {
                    deliveries.push(delivery);
                }
            }
        }
        deliveries
    }

    async fn load_pending(&self) -> Vec<Delivery> {
        let Some(mut conn) = self.connection().await else {
            return Vec::new();
        };
        let map: std::collections::HashMap<String, String> =
            conn.hgetall(self.records_key()).await.unwrap_or_default();
        map.into_values()
            .filter_map(|raw| serde_json::from_str::<Delivery>(&raw).ok())
            .filter(|d| d.status == DeliveryStatus::Pending)
            .collect()
    }
}
