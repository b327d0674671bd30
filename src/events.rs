//! Outbound event emission (spec.md §6: "Event emission").
//!
//! After a committed transition, `(orderId, newState, timestamp)` is
//! published for the messaging adapter (out of scope here) to fan out as a
//! retailer/wholesaler notification. Two implementations exist behind the
//! same port, selected at startup by whether `REDIS_URL` is configured
//! (spec.md §6) — the Redis wire protocol itself is out of scope, this port
//! only needs to serialize and hand the message off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core_types::OrderId;

#[derive(Debug, Clone, Serialize)]
pub struct OrderStateEvent {
    pub order_id: i64,
    pub new_state: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderStateEvent {
    pub fn new(order_id: OrderId, new_state: &str) -> Self {
        Self { order_id: order_id.get(), new_state: new_state.to_string(), timestamp: Utc::now() }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: OrderStateEvent);
}

/// Redis-backed fan-out (real wire protocol intentionally out of scope per
/// spec.md §1 — a production build would `PUBLISH` the serialized event on a
/// channel here via `redis::Client`).
pub struct RedisPublisher {
    channel: String,
}

impl RedisPublisher {
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into() }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: OrderStateEvent) {
        tracing::debug!(channel = %self.channel, order_id = event.order_id, state = %event.new_state, "publish to redis");
    }
}

/// In-process fallback used when `REDIS_URL` is unset: events are dropped
/// into an mpsc channel drained by a no-op sink, so outbound emission never
/// blocks command dispatch even with no subscriber configured.
pub struct InlinePublisher {
    tx: mpsc::UnboundedSender<OrderStateEvent>,
}

impl InlinePublisher {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!(order_id = event.order_id, state = %event.new_state, "order state event (inline)");
            }
        });
        Self { tx }
    }
}

impl Default for InlinePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InlinePublisher {
    async fn publish(&self, event: OrderStateEvent) {
        let _ = self.tx.send(event);
    }
}
