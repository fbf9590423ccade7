use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Domain events emitted by the surrounding platform.
///
/// The set is closed: producers pick a variant, receivers subscribe by the
/// wire string (`order.created`, ...). Adding a variant is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.fulfilled")]
    OrderFulfilled,
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    #[serde(rename = "payment.settled")]
    PaymentSettled,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "design.published")]
    DesignPublished,
    #[serde(rename = "design.updated")]
    DesignUpdated,
    #[serde(rename = "design.deleted")]
    DesignDeleted,
}

impl EventType {
    /// Wire representation, used in `X-Event-Type` and the payload envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderFulfilled => "order.fulfilled",
            EventType::OrderCancelled => "order.cancelled",
            EventType::PaymentSettled => "payment.settled",
            EventType::PaymentFailed => "payment.failed",
            EventType::DesignPublished => "design.published",
            EventType::DesignUpdated => "design.updated",
            EventType::DesignDeleted => "design.deleted",
        }
    }

    /// Parse a wire string back into a variant.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }

    /// Every known event type.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::OrderCreated,
            EventType::OrderFulfilled,
            EventType::OrderCancelled,
            EventType::PaymentSettled,
            EventType::PaymentFailed,
            EventType::DesignPublished,
            EventType::DesignUpdated,
            EventType::DesignDeleted,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for an endpoint.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of endpoint IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn generate() -> Self {
        Self(format!("ep_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(format!("evt_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one delivery attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(format!("dlv_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the organization that owns an endpoint or emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable domain event handed to the dispatcher.
///
/// The payload is an opaque JSON document; the delivery subsystem never
/// inspects it beyond canonical serialization. `context` carries the
/// filter-matchable attributes endpoints may be configured against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub organization_id: Option<OrganizationId>,
    pub context: HashMap<String, String>,
}

impl Event {
    /// Create a new event with a generated id.
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::generate(),
            event_type,
            payload,
            organization_id: None,
            context: HashMap::new(),
        }
    }

    /// Use a caller-supplied event id (producers that want receiver-side
    /// deduplication keyed on their own ids).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EventId(id.into());
        self
    }

    /// Attribute the event to an organization.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(OrganizationId(organization_id.into()));
        self
    }

    /// Add one filter-matchable context attribute.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Registration request for a new endpoint.
#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub url: String,
    pub secret: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub subscribed_events: Vec<EventType>,
    pub filters: HashMap<String, String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl NewEndpoint {
    /// Start a registration with default delivery settings.
    ///
    /// Defaults:
    /// - timeout: 5 seconds
    /// - max_retries: 5
    pub fn new(url: impl Into<String>, subscribed_events: Vec<EventType>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            organization_id: None,
            subscribed_events,
            filters: HashMap::new(),
            timeout: Duration::from_secs(5),
            max_retries: 5,
        }
    }

    /// Supply the signing secret instead of generating one.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Scope the endpoint to an organization.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(OrganizationId(organization_id.into()));
        self
    }

    /// Require an event context attribute to equal `value` for a match.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Set a custom timeout for delivery attempts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts after the initial attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A registered receiver.
///
/// The secret is immutable after creation; rotation goes through the
/// registry and resets the consecutive-failure counter. Counters are only
/// mutated through the registry's per-endpoint update path.
#[derive(Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub organization_id: Option<OrganizationId>,
    pub url: String,
    pub secret: String,
    pub subscribed_events: Vec<EventType>,
    pub filters: HashMap<String, String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub is_active: bool,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<u64>,
    pub last_delivery_at: Option<u64>,
    pub created_at: u64,
}

impl Endpoint {
    pub fn subscribes_to(&self, event_type: EventType) -> bool {
        self.subscribed_events.contains(&event_type)
    }

    /// Full matching predicate used by dispatch.
    ///
    /// Active, subscribed to the type, organization-compatible, and every
    /// configured filter key present in the event context with an equal
    /// value. No configured filters matches everything.
    pub fn matches(
        &self,
        event_type: EventType,
        context: &HashMap<String, String>,
        organization_id: Option<&OrganizationId>,
    ) -> bool {
        if !self.is_active || !self.subscribes_to(event_type) {
            return false;
        }
        if let Some(ref own_org) = self.organization_id {
            if organization_id != Some(own_org) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(key, value)| context.get(key) == Some(value))
    }
}

// Debug keeps the signing secret out of logs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .field("subscribed_events", &self.subscribed_events)
            .field("filters", &self.filters)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("is_active", &self.is_active)
            .field("successful_deliveries", &self.successful_deliveries)
            .field("failed_deliveries", &self.failed_deliveries)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

/// Lifecycle status of one delivery attempt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One delivery attempt of an event to an endpoint.
///
/// Each attempt is its own record: a failed attempt spawns a fresh
/// `Pending` record with `attempt_number + 1`, and the failed record stays
/// behind as immutable history. Records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub event_id: EventId,
    pub event_type: EventType,
    pub request_url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,
    pub attempt_number: u32,
    pub status: DeliveryStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: u64,
    pub next_retry_at: Option<u64>,
    pub max_retries_reached: bool,
}

impl Delivery {
    /// Terminal records never get another attempt.
    pub fn is_terminal(&self) -> bool {
        self.status == DeliveryStatus::Delivered || self.max_retries_reached
    }

    /// Build the follow-up `Pending` record for the next attempt in the
    /// chain. Request URL, headers, and body are carried over unchanged so
    /// every attempt is byte-identical on the wire.
    pub(crate) fn next_attempt(&self, next_retry_at: u64, created_at: u64) -> Delivery {
        Delivery {
            id: DeliveryId::generate(),
            endpoint_id: self.endpoint_id.clone(),
            event_id: self.event_id.clone(),
            event_type: self.event_type,
            request_url: self.request_url.clone(),
            request_headers: self.request_headers.clone(),
            request_body: self.request_body.clone(),
            attempt_number: self.attempt_number + 1,
            status: DeliveryStatus::Pending,
            response_status: None,
            response_body: None,
            duration_ms: None,
            error: None,
            created_at,
            next_retry_at: Some(next_retry_at),
            max_retries_reached: false,
        }
    }
}

/// Seconds since the unix epoch.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(subscribed: Vec<EventType>) -> Endpoint {
        Endpoint {
            id: EndpointId::generate(),
            organization_id: None,
            url: "https://example.com/hooks".to_string(),
            secret: "whsec_test".to_string(),
            subscribed_events: subscribed,
            filters: HashMap::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            is_active: true,
            successful_deliveries: 0,
            failed_deliveries: 0,
            consecutive_failures: 0,
            last_success_at: None,
            last_delivery_at: None,
            created_at: 0,
        }
    }

    fn delivery() -> Delivery {
        Delivery {
            id: DeliveryId::generate(),
            endpoint_id: EndpointId::generate(),
            event_id: EventId::generate(),
            event_type: EventType::OrderCreated,
            request_url: "https://example.com/hooks".to_string(),
            request_headers: vec![("X-Event-Type".to_string(), "order.created".to_string())],
            request_body: b"{}".to_vec(),
            attempt_number: 1,
            status: DeliveryStatus::Pending,
            response_status: None,
            response_body: None,
            duration_ms: None,
            error: None,
            created_at: 100,
            next_retry_at: None,
            max_retries_reached: false,
        }
    }

    #[test]
    fn event_type_round_trips_through_wire_strings() {
        for t in EventType::all() {
            assert_eq!(EventType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(EventType::parse("order.exploded"), None);
    }

    #[test]
    fn matches_requires_active_and_subscribed() {
        let mut e = endpoint(vec![EventType::OrderCreated]);
        let ctx = HashMap::new();

        assert!(e.matches(EventType::OrderCreated, &ctx, None));
        assert!(!e.matches(EventType::PaymentSettled, &ctx, None));

        e.is_active = false;
        assert!(!e.matches(EventType::OrderCreated, &ctx, None));
    }

    #[test]
    fn matches_applies_filter_subset() {
        let mut e = endpoint(vec![EventType::DesignPublished]);
        e.filters.insert("region".to_string(), "eu".to_string());

        let mut ctx = HashMap::new();
        assert!(!e.matches(EventType::DesignPublished, &ctx, None));

        ctx.insert("region".to_string(), "us".to_string());
        assert!(!e.matches(EventType::DesignPublished, &ctx, None));

        ctx.insert("region".to_string(), "eu".to_string());
        ctx.insert("unrelated".to_string(), "ignored".to_string());
        assert!(e.matches(EventType::DesignPublished, &ctx, None));
    }

    #[test]
    fn matches_scopes_by_organization() {
        let mut e = endpoint(vec![EventType::OrderCreated]);
        e.organization_id = Some(OrganizationId("org_a".to_string()));
        let ctx = HashMap::new();

        assert!(!e.matches(EventType::OrderCreated, &ctx, None));
        let other = OrganizationId("org_b".to_string());
        assert!(!e.matches(EventType::OrderCreated, &ctx, Some(&other)));
        let own = OrganizationId("org_a".to_string());
        assert!(e.matches(EventType::OrderCreated, &ctx, Some(&own)));
    }

    #[test]
    fn next_attempt_increments_and_resets_outcome_fields() {
        let mut first = delivery();
        first.status = DeliveryStatus::Failed;
        first.response_status = Some(500);
        first.error = Some("HTTP 500".to_string());
        first.duration_ms = Some(12);

        let second = first.next_attempt(160, 101);
        assert_ne!(second.id, first.id);
        assert_eq!(second.attempt_number, 2);
        assert_eq!(second.status, DeliveryStatus::Pending);
        assert_eq!(second.next_retry_at, Some(160));
        assert_eq!(second.request_body, first.request_body);
        assert_eq!(second.request_headers, first.request_headers);
        assert!(second.response_status.is_none());
        assert!(second.error.is_none());
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut d = delivery();
        assert!(!d.is_terminal());

        d.status = DeliveryStatus::Delivered;
        assert!(d.is_terminal());

        d.status = DeliveryStatus::Failed;
        assert!(!d.is_terminal());
        d.max_retries_reached = true;
        assert!(d.is_terminal());
    }

    #[test]
    fn endpoint_debug_redacts_secret() {
        let e = endpoint(vec![EventType::OrderCreated]);
        let rendered = format!("{e:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("whsec_test"));
    }
}
