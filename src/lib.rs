//! Outbound webhook delivery for platform domain events.
//!
//! This crate is the component that notifies external HTTP receivers when
//! domain events occur (orders created, payments settled, designs
//! published). Events fan out to matching registered endpoints as signed
//! HTTP POSTs, delivered by a bounded worker pool with scheduled retries
//! and automatic disabling of chronically failing receivers.
//!
//! ## Guarantees
//! - At-least-once delivery under eventual receiver connectivity
//! - Bounded queues and concurrency, with explicit backpressure
//! - HMAC-SHA256 signed payloads over canonical JSON
//! - Per-attempt delivery records, never deleted
//! - Chronically failing endpoints are disabled, not retried forever
//!
//! ## Non-Guarantees
//! - Exactly-once delivery (receivers deduplicate on the event id)
//! - Ordering across deliveries to the same endpoint
//! - Payload transformation or templating
//!
//! Event producers interact with exactly one call: [`Courier::dispatch`].
//! Everything after a successful enqueue — failures, retries, exhaustion —
//! is recorded on delivery records and visible through the query API,
//! never raised back to the producer.

mod dispatcher;
mod error;
mod health;
mod registry;
mod retry;
mod signing;
mod stats;
mod store;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod store_redis;

#[cfg(feature = "postgres")]
mod store_postgres;

pub use dispatcher::{Courier, CourierConfig};
pub use error::{DispatchError, FailureKind};
pub use registry::EndpointRegistry;
pub use retry::RetryPolicy;
pub use signing::{
    build_signed_request, canonical_body, compute_signature, verify_signature, SignedRequest,
    CONTENT_TYPE_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_AGENT,
    USER_AGENT_HEADER,
};
pub use stats::{DeliveryStats, StatsAggregator};
pub use store::{DeliveryStore, InMemoryStore};
pub use types::{
    Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, Event, EventId, EventType,
    NewEndpoint, OrganizationId,
};

#[cfg(feature = "redis")]
pub use store_redis::RedisStore;

#[cfg(feature = "postgres")]
pub use store_postgres::PostgresStore;
