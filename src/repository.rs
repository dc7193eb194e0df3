use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::RepositoryError;
use crate::types::Order;

/// Outcome of a merchant-testing webhook, reported back to the billing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: String,
    pub project_id: String,
    pub notification_type: String,
    pub passed: bool,
}

/// Remote order/merchant store owned by the billing service.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn update_order(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn notify_test_results(&self, result: &TestResult) -> Result<(), RepositoryError>;

    /// Rate to convert an amount in `from` currency into `to` currency.
    async fn get_convert_rate(&self, from: &str, to: &str) -> Result<f64, RepositoryError>;
}

/// Persist the order snapshot. Failures are logged and never retried:
/// the webhook outcome stands even when the billing service is down.
pub(crate) async fn persist_order(repository: &dyn OrderRepository, order: &Order) {
    if let Err(err) = repository.update_order(order).await {
        error!(
            order_id = %order.id,
            protocol = %order.callback_protocol(),
            error = %err,
            "repository service return error, update order failed"
        );
    }
}
