//! Best-effort realtime status push.
//!
//! Three one-way channels: the payer-facing order channel, the ops admin
//! channel and the merchant testing channel. Every publish failure is
//! logged and swallowed; nothing here may abort webhook delivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::RealtimeError;
use crate::types::Order;

/// `Publish(channel, payload)` capability.
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RealtimeError>;
}

/// Channel names. `{}` in a mask is replaced by the order uuid (user
/// channel) or the merchant id (testing channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeChannels {
    pub user_channel_mask: String,
    pub admin_channel: String,
    pub merchant_testing_channel_mask: String,
}

impl Default for RealtimeChannels {
    fn default() -> Self {
        Self {
            user_channel_mask: "paysuper:order#{}".to_string(),
            admin_channel: "paysuper:admin".to_string(),
            merchant_testing_channel_mask: "paysuper:merchant:order_testing#{}".to_string(),
        }
    }
}

impl RealtimeChannels {
    pub fn user_channel(&self, order: &Order) -> String {
        self.user_channel_mask.replace("{}", &order.uuid)
    }

    pub fn merchant_testing_channel(&self, order: &Order) -> String {
        self.merchant_testing_channel_mask
            .replace("{}", &order.project.merchant_id)
    }
}

pub struct RealtimeNotifier {
    /// Serves the payer-facing payment form.
    payment_form: Arc<dyn RealtimePublisher>,
    /// Serves the admin and merchant dashboards.
    dashboard: Arc<dyn RealtimePublisher>,
    channels: RealtimeChannels,
}

impl RealtimeNotifier {
    pub fn new(
        payment_form: Arc<dyn RealtimePublisher>,
        dashboard: Arc<dyn RealtimePublisher>,
        channels: RealtimeChannels,
    ) -> Self {
        Self {
            payment_form,
            dashboard,
            channels,
        }
    }

    pub fn channels(&self) -> &RealtimeChannels {
        &self.channels
    }

    pub async fn notify_user(&self, order: &Order) {
        let decline = order
            .decline
            .as_ref()
            .map(|d| json!({"code": d.code, "reason": d.reason}))
            .unwrap_or(Value::Null);
        let payload = json!({
            "order_id": order.uuid,
            "status": order.public_status().as_str(),
            "decline": decline,
        });
        let channel = self.channels.user_channel(order);
        publish_logged(self.payment_form.as_ref(), &channel, payload, &order.id).await;
    }

    pub async fn notify_admin(&self, order: &Order, message: &str) {
        let payload = json!({
            "message": message,
            "order_id": order.id,
        });
        publish_logged(
            self.dashboard.as_ref(),
            &self.channels.admin_channel,
            payload,
            &order.id,
        )
        .await;
    }

    pub async fn notify_merchant_testing(&self, order: &Order, response: &str) {
        let payload = json!({
            "order_id": order.id,
            "test_case": order.testing_case,
            "response": response,
        });
        let channel = self.channels.merchant_testing_channel(order);
        publish_logged(self.dashboard.as_ref(), &channel, payload, &order.id).await;
    }
}

async fn publish_logged(publisher: &dyn RealtimePublisher, channel: &str, payload: Value, order_id: &str) {
    if let Err(err) = publisher.publish(channel, payload).await {
        warn!(order_id, channel, error = %err, "send message to realtime channel failed");
    }
}

/// Centrifugo HTTP API publisher.
#[cfg(feature = "http")]
pub struct CentrifugoPublisher {
    client: reqwest::Client,
    api_url: String,
    api_secret: String,
}

#[cfg(feature = "http")]
impl CentrifugoPublisher {
    pub fn new(client: reqwest::Client, url: &str, api_secret: impl Into<String>) -> Self {
        Self {
            client,
            api_url: format!("{}/api", url.trim_end_matches('/')),
            api_secret: api_secret.into(),
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl RealtimePublisher for CentrifugoPublisher {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RealtimeError> {
        let command = json!({
            "method": "publish",
            "params": {"channel": channel, "data": payload},
        });

        let failed = |reason: String| RealtimeError::Publish {
            channel: channel.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("apikey {}", self.api_secret))
            .json(&command)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("unexpected status {}", response.status())));
        }

        // Centrifugo reports command errors with a 200 and an `error` object.
        let body: Value = response.json().await.map_err(|e| failed(e.to_string()))?;
        if let Some(error) = body.get("error") {
            return Err(failed(error.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderDecline, OrderStatus};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl RealtimePublisher for Recorder {
        async fn publish(&self, channel: &str, payload: Value) -> Result<(), RealtimeError> {
            self.sent.lock().await.push((channel.to_string(), payload));
            if self.fail {
                return Err(RealtimeError::Publish {
                    channel: channel.to_string(),
                    reason: "down".to_string(),
                });
            }
            Ok(())
        }
    }

    fn order() -> Order {
        let mut order = Order {
            id: "o1".to_string(),
            uuid: "u1".to_string(),
            private_status: OrderStatus::PaymentSystemDeclined,
            testing_case: "case-1".to_string(),
            decline: Some(OrderDecline {
                code: "05".to_string(),
                reason: "do not honor".to_string(),
            }),
            ..Default::default()
        };
        order.project.merchant_id = "m1".to_string();
        order
    }

    #[tokio::test]
    async fn channels_are_routed_to_their_publishers() {
        let form = Arc::new(Recorder::default());
        let dashboard = Arc::new(Recorder::default());
        let notifier = RealtimeNotifier::new(form.clone(), dashboard.clone(), RealtimeChannels::default());

        let order = order();
        notifier.notify_user(&order).await;
        notifier.notify_admin(&order, "notification for deleted project").await;
        notifier.notify_merchant_testing(&order, "passed").await;

        let form_sent = form.sent.lock().await;
        assert_eq!(form_sent.len(), 1);
        assert_eq!(form_sent[0].0, "paysuper:order#u1");
        assert_eq!(form_sent[0].1["status"], "rejected");
        assert_eq!(form_sent[0].1["decline"]["code"], "05");

        let dash_sent = dashboard.sent.lock().await;
        assert_eq!(dash_sent.len(), 2);
        assert_eq!(dash_sent[0].0, "paysuper:admin");
        assert_eq!(dash_sent[0].1["order_id"], "o1");
        assert_eq!(dash_sent[1].0, "paysuper:merchant:order_testing#m1");
        assert_eq!(dash_sent[1].1["test_case"], "case-1");
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let notifier = RealtimeNotifier::new(failing.clone(), failing.clone(), RealtimeChannels::default());
        notifier.notify_user(&order()).await;
        notifier.notify_admin(&order(), "boom").await;
        assert_eq!(failing.sent.lock().await.len(), 2);
    }
}
