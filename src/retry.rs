use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::{Delivery, OutboundMessage, Publisher};
use crate::error::BrokerError;
use crate::realtime::RealtimeNotifier;
use crate::types::Order;

/// Fleet-wide attempt budget: 288 retries at a 600s delay is two days.
pub const MAX_ATTEMPTS: u32 = 288;
pub const RETRY_DELAY_SECS: u64 = 600;
pub const RETRY_EXCHANGE: &str = "notify-payment-retry";

pub const MSG_RETRY_ENDED: &str = "Republishing message to RabbitMQ ended with max retry count";

/// Retry bookkeeping carried by a broker delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEnvelope {
    pub attempt_count: u32,
    pub routing_key: String,
}

impl RetryEnvelope {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            attempt_count: delivery.retry_count,
            routing_key: delivery.routing_key.clone(),
        }
    }

    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Exchange whose queue holds messages for the TTL, then dead-letters
    /// them back to the primary exchange.
    pub exchange: String,
    pub max_attempts: u32,
    /// Pause before the single in-process republish retry.
    pub republish_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            exchange: RETRY_EXCHANGE.to_string(),
            max_attempts: MAX_ATTEMPTS,
            republish_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Republished { attempt_count: u32 },
    Exhausted,
}

/// Delays retries through the broker: republish with `attempt + 1` to the
/// retry exchange, and let TTL plus dead-lettering bring it back.
pub struct RetryScheduler {
    publisher: Arc<dyn Publisher>,
    realtime: Arc<RealtimeNotifier>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(publisher: Arc<dyn Publisher>, realtime: Arc<RealtimeNotifier>, policy: RetryPolicy) -> Self {
        Self {
            publisher,
            realtime,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_exhausted(&self, envelope: &RetryEnvelope) -> bool {
        envelope.is_exhausted(self.policy.max_attempts)
    }

    /// Republish `order`, the event as it was received, or alert the admin
    /// channel once the budget is spent.
    pub async fn retry(&self, envelope: &RetryEnvelope, order: &Order) -> Result<RetryOutcome, BrokerError> {
        if self.is_exhausted(envelope) {
            error!(
                order_id = %order.id,
                attempt = envelope.attempt_count,
                "{}", MSG_RETRY_ENDED
            );
            metric_inc("notifier.retry.exhausted");
            self.realtime.notify_admin(order, MSG_RETRY_ENDED).await;
            return Ok(RetryOutcome::Exhausted);
        }

        let body = serde_json::to_vec(order).map_err(|e| BrokerError::Encoding(e.to_string()))?;
        let message = OutboundMessage {
            exchange: self.policy.exchange.clone(),
            routing_key: envelope.routing_key.clone(),
            body,
            retry_count: envelope.attempt_count + 1,
        };

        if let Err(err) = self.publisher.publish(message.clone()).await {
            warn!(
                order_id = %order.id,
                attempt = envelope.attempt_count,
                error = %err,
                "republish message to RabbitMQ failed"
            );
            tokio::time::sleep(self.policy.republish_backoff).await;
            self.publisher.publish(message).await?;
        }

        metric_inc("notifier.retry.scheduled");
        info!(
            order_id = %order.id,
            attempt = envelope.attempt_count + 1,
            "notification scheduled for retry"
        );
        Ok(RetryOutcome::Republished {
            attempt_count: envelope.attempt_count + 1,
        })
    }
}

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}
