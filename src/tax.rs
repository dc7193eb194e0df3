//! Forwarding of US sales to the tax-reporting queues.
//!
//! Runs next to the merchant webhook with its own idempotency key space
//! (`tj:notify:{id}`) and its own order flags (`taxjar.payment`,
//! `taxjar.refund`).

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::broker::{OutboundMessage, Publisher};
use crate::error::{BrokerError, NotifyError};
use crate::idempotency::{tax_key, IdempotencyStore, NotificationRecord};
use crate::realtime::RealtimeNotifier;
use crate::repository::{persist_order, OrderRepository};
use crate::types::{Order, PublicStatus};

pub const TAX_COUNTRY: &str = "US";
pub const TRANSACTIONS_TOPIC: &str = "taxjar-transactions";
pub const REFUNDS_TOPIC: &str = "taxjar-refunds";

pub const MSG_TAX_PUBLISH_FAILED: &str = "send order to taxjar queue failed";

const FIELD_PAYMENT: &str = "payment";
const FIELD_REFUND: &str = "refund";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxOutcome {
    /// Order is not taxable in the reporting sense.
    NotApplicable,
    AlreadyForwarded,
    Forwarded,
}

/// Where a taxable order goes: topic plus status token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaxRoute<'a> {
    topic: &'a str,
    field: &'static str,
}

impl TaxRoute<'_> {
    fn flag(&self) -> String {
        format!("taxjar.{}", self.field)
    }
}

pub struct TaxForwarder {
    publisher: Arc<dyn Publisher>,
    transactions_topic: String,
    refunds_topic: String,
}

impl TaxForwarder {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        transactions_topic: impl Into<String>,
        refunds_topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            transactions_topic: transactions_topic.into(),
            refunds_topic: refunds_topic.into(),
        }
    }

    pub fn applies_to(&self, order: &Order) -> bool {
        self.route(order).is_some()
    }

    fn route(&self, order: &Order) -> Option<TaxRoute<'_>> {
        if order.country_code != TAX_COUNTRY || order.tax_rate == 0.0 {
            return None;
        }
        match order.public_status() {
            PublicStatus::Processed => Some(TaxRoute {
                topic: &self.transactions_topic,
                field: FIELD_PAYMENT,
            }),
            PublicStatus::Refunded => Some(TaxRoute {
                topic: &self.refunds_topic,
                field: FIELD_REFUND,
            }),
            _ => None,
        }
    }

    /// Publish the order to its tax topic unless that already happened.
    ///
    /// A failed publish alerts the admin channel and is returned as a
    /// retryable error; it never blocks the merchant webhook.
    pub async fn forward(
        &self,
        order: &mut Order,
        store: &dyn IdempotencyStore,
        repository: &dyn OrderRepository,
        realtime: &RealtimeNotifier,
    ) -> Result<TaxOutcome, NotifyError> {
        let Some(route) = self.route(order) else {
            return Ok(TaxOutcome::NotApplicable);
        };
        let key = tax_key(&order.id);

        let record = match store.get(&key).await {
            Ok(record) => record,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "get tax notification stat failed");
                NotificationRecord::empty(&key)
            }
        };

        if record.is_delivered(route.field) {
            debug!(order_id = %order.id, topic = route.topic, "order already forwarded for tax reporting");
            order.set_notification_flag(route.flag(), true);
            persist_order(repository, order).await;
            return Ok(TaxOutcome::AlreadyForwarded);
        }

        let published = self.publish(order, route.topic).await;
        if let Err(err) = store.set(&key, route.field, published.is_ok()).await {
            warn!(order_id = %order.id, error = %err, "set tax notification stat failed");
        }

        match published {
            Ok(()) => {
                order.set_notification_flag(route.flag(), true);
                persist_order(repository, order).await;
                Ok(TaxOutcome::Forwarded)
            }
            Err(err) => {
                error!(order_id = %order.id, topic = route.topic, error = %err, "{}", MSG_TAX_PUBLISH_FAILED);
                realtime.notify_admin(order, MSG_TAX_PUBLISH_FAILED).await;
                Err(NotifyError::TaxForwarding(err))
            }
        }
    }

    async fn publish(&self, order: &Order, topic: &str) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(order).map_err(|e| BrokerError::Encoding(e.to_string()))?;
        self.publisher
            .publish(OutboundMessage {
                exchange: topic.to_string(),
                routing_key: topic.to_string(),
                body,
                retry_count: 0,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryPublisher;
    use crate::types::OrderStatus;

    fn forwarder() -> TaxForwarder {
        TaxForwarder::new(Arc::new(InMemoryPublisher::new()), TRANSACTIONS_TOPIC, REFUNDS_TOPIC)
    }

    fn us_order(status: OrderStatus) -> Order {
        Order {
            id: "o1".to_string(),
            country_code: TAX_COUNTRY.to_string(),
            tax_rate: 0.08,
            private_status: status,
            ..Default::default()
        }
    }

    #[test]
    fn routes_by_public_status() {
        let forwarder = forwarder();

        let route = forwarder.route(&us_order(OrderStatus::ProjectComplete)).expect("processed");
        assert_eq!(route.topic, TRANSACTIONS_TOPIC);
        assert_eq!(route.flag(), "taxjar.payment");

        let route = forwarder.route(&us_order(OrderStatus::Refund)).expect("refunded");
        assert_eq!(route.topic, REFUNDS_TOPIC);
        assert_eq!(route.flag(), "taxjar.refund");

        assert!(!forwarder.applies_to(&us_order(OrderStatus::Chargeback)));
    }

    #[test]
    fn requires_us_and_non_zero_rate() {
        let forwarder = forwarder();

        let mut order = us_order(OrderStatus::ProjectComplete);
        order.country_code = "DE".to_string();
        assert!(!forwarder.applies_to(&order));

        let mut order = us_order(OrderStatus::ProjectComplete);
        order.tax_rate = 0.0;
        assert!(!forwarder.applies_to(&order));
    }
}
