use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BrokerError;

/// Header carrying the number of times an event was republished.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// One message as consumed from the primary queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,

    /// Value of `x-retry-count`, 0 when the header is absent.
    pub retry_count: u32,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// One message handed to the broker for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub retry_count: u32,
}

/// `Publish(topic, message, headers)` capability.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}

/// What the consumer does with a delivery once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Settled: delivered, suppressed, terminal, or republished for retry.
    Ack,
    /// Nothing durable happened; hand it back to the broker for redelivery.
    Requeue,
}

/// Consumer side: whatever handles a delivery from the primary queue.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Disposition;
}

/// `Subscribe(handler)` capability. Runs until the consumer stops.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), BrokerError>;
}

/// Publisher that keeps every message in memory.
#[derive(Default)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.published.lock().await)
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.published.lock().await.push(message);
        Ok(())
    }
}
