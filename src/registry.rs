//! Registry of receiver endpoints.
//!
//! Holds the live view of every registered endpoint, answers the matching
//! query for dispatch, and owns the only write path for the per-endpoint
//! rolling counters. Each endpoint sits behind its own lock, so counter
//! updates from concurrent workers touching different endpoints never
//! contend, and updates to the same endpoint serialize on that endpoint
//! alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::DispatchError;
use crate::types::{unix_now_secs, Endpoint, EndpointId, EventType, NewEndpoint, OrganizationId};

struct CachedIndex {
    cached_at: Instant,
    subscribed: Vec<EndpointId>,
}

pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<EndpointId, Arc<RwLock<Endpoint>>>>,
    // Subscription index per event type. Filters and activity are checked
    // against the live records on every call; the cache only skips the full
    // scan.
    subscription_cache: Mutex<HashMap<EventType, CachedIndex>>,
    cache_ttl: Duration,
}

impl EndpointRegistry {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            subscription_cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Register a new endpoint.
    ///
    /// The URL must be an absolute http(s) URL. When no secret is supplied,
    /// a fresh one is generated from the operating system CSPRNG.
    pub async fn register(&self, new: NewEndpoint) -> Result<Endpoint, DispatchError> {
        validate_url(&new.url)?;

        let endpoint = Endpoint {
            id: EndpointId::generate(),
            organization_id: new.organization_id,
            url: new.url,
            secret: new.secret.unwrap_or_else(generate_secret),
            subscribed_events: new.subscribed_events,
            filters: new.filters,
            timeout: new.timeout,
            max_retries: new.max_retries,
            is_active: true,
            successful_deliveries: 0,
            failed_deliveries: 0,
            consecutive_failures: 0,
            last_success_at: None,
            last_delivery_at: None,
            created_at: unix_now_secs(),
        };

        let snapshot = endpoint.clone();
        self.endpoints
            .write()
            .await
            .insert(endpoint.id.clone(), Arc::new(RwLock::new(endpoint)));
        self.invalidate_cache().await;

        tracing::info!(
            endpoint_id = %snapshot.id,
            url = %snapshot.url,
            subscriptions = snapshot.subscribed_events.len(),
            "registered endpoint"
        );
        Ok(snapshot)
    }

    /// Snapshot of one endpoint.
    pub async fn get(&self, id: &EndpointId) -> Option<Endpoint> {
        let cell = {
            let guard = self.endpoints.read().await;
            guard.get(id).cloned()
        };
        match cell {
            Some(cell) => Some(cell.read().await.clone()),
            None => None,
        }
    }

    /// Stop routing new deliveries to an endpoint.
    ///
    /// Retries already scheduled still fire once; no further retries are
    /// scheduled after them.
    pub async fn deactivate(&self, id: &EndpointId) -> Result<(), DispatchError> {
        let cell = {
            let guard = self.endpoints.read().await;
            guard
                .get(id)
                .cloned()
                .ok_or_else(|| DispatchError::EndpointNotFound(id.clone()))?
        };
        cell.write().await.is_active = false;
        self.invalidate_cache().await;
        tracing::info!(endpoint_id = %id, "deactivated endpoint");
        Ok(())
    }

    /// Issue a fresh secret and reset the consecutive-failure counter.
    ///
    /// Deliveries already constructed keep the signature of the secret they
    /// were signed with.
    pub async fn rotate_secret(&self, id: &EndpointId) -> Result<String, DispatchError> {
        let cell = {
            let guard = self.endpoints.read().await;
            guard
                .get(id)
                .cloned()
                .ok_or_else(|| DispatchError::EndpointNotFound(id.clone()))?
        };
        let secret = generate_secret();
        {
            let mut endpoint = cell.write().await;
            endpoint.secret = secret.clone();
            endpoint.consecutive_failures = 0;
        }
        self.invalidate_cache().await;
        tracing::info!(endpoint_id = %id, "rotated endpoint secret");
        Ok(secret)
    }

    /// Endpoints that should receive an event: active, subscribed to the
    /// type, organization-compatible, filter map a subset of the context.
    pub async fn find_matching(
        &self,
        event_type: EventType,
        context: &HashMap<String, String>,
        organization_id: Option<&OrganizationId>,
    ) -> Vec<Endpoint> {
        let candidate_ids = self.subscribed_ids(event_type).await;

        let cells: Vec<Arc<RwLock<Endpoint>>> = {
            let guard = self.endpoints.read().await;
            candidate_ids
                .iter()
                .filter_map(|id| guard.get(id).cloned())
                .collect()
        };

        let mut matched = Vec::new();
        for cell in cells {
            let endpoint = cell.read().await;
            if endpoint.matches(event_type, context, organization_id) {
                matched.push(endpoint.clone());
            }
        }
        matched
    }

    /// Snapshot of every active endpoint (health-monitor scan).
    pub async fn active_endpoints(&self) -> Vec<Endpoint> {
        let cells: Vec<Arc<RwLock<Endpoint>>> =
            self.endpoints.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for cell in cells {
            let endpoint = cell.read().await;
            if endpoint.is_active {
                active.push(endpoint.clone());
            }
        }
        active
    }

    /// Record a delivered attempt: bump the success counter, reset the
    /// consecutive-failure streak.
    pub async fn record_success(&self, id: &EndpointId) {
        let cell = {
            let guard = self.endpoints.read().await;
            guard.get(id).cloned()
        };
        let Some(cell) = cell else { return };
        let mut endpoint = cell.write().await;
        let now = unix_now_secs();
        endpoint.successful_deliveries += 1;
        endpoint.consecutive_failures = 0;
        endpoint.last_success_at = Some(now);
        endpoint.last_delivery_at = Some(now);
    }

    /// Record a failed attempt: bump the failure counters.
    pub async fn record_failure(&self, id: &EndpointId) {
        let cell = {
            let guard = self.endpoints.read().await;
            guard.get(id).cloned()
        };
        let Some(cell) = cell else { return };
        let mut endpoint = cell.write().await;
        endpoint.failed_deliveries += 1;
        endpoint.consecutive_failures += 1;
        endpoint.last_delivery_at = Some(unix_now_secs());
    }

    async fn subscribed_ids(&self, event_type: EventType) -> Vec<EndpointId> {
        {
            let cache = self.subscription_cache.lock().await;
            if let Some(entry) = cache.get(&event_type) {
                if entry.cached_at.elapsed() < self.cache_ttl {
                    return entry.subscribed.clone();
                }
            }
        }

        let mut subscribed = Vec::new();
        let cells: Vec<(EndpointId, Arc<RwLock<Endpoint>>)> = {
            let guard = self.endpoints.read().await;
            guard
                .iter()
                .map(|(id, cell)| (id.clone(), cell.clone()))
                .collect()
        };
        for (id, cell) in cells {
            if cell.read().await.subscribes_to(event_type) {
                subscribed.push(id);
            }
        }

        let mut cache = self.subscription_cache.lock().await;
        cache.insert(
            event_type,
            CachedIndex {
                cached_at: Instant::now(),
                subscribed: subscribed.clone(),
            },
        );
        subscribed
    }

    async fn invalidate_cache(&self) {
        self.subscription_cache.lock().await.clear();
    }
}

fn validate_url(url: &str) -> Result<(), DispatchError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| DispatchError::Validation(format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(DispatchError::Validation(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(DispatchError::Validation("URL must have a host".to_string()));
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}
