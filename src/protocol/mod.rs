//! Merchant notification protocols.
//!
//! The protocol set is closed, so strategies are variants of [`Protocol`]
//! rather than trait objects looked up in a map.

mod cardpay;
mod default;
mod empty;
mod wallet;

use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::NotifyError;
use crate::idempotency::{webhook_key, IdempotencyStore};
use crate::realtime::RealtimeNotifier;
use crate::repository::{persist_order, OrderRepository};
use crate::retry::RetryEnvelope;
use crate::sender::{Sender, WebhookRequest, WebhookResponse};
use crate::types::{Order, OrderStatus, PublicStatus};

pub use cardpay::{alphabet_status, CardPayCallback};
pub use default::{event_name, notification_url, OrderNotificationMessage};
pub use wallet::{payout_amount, WalletCheckNotification, WalletPaymentNotification};

pub const ACTION_CHECK: &str = "check";
pub const ACTION_PAYMENT: &str = "payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// No outbound call, the order is just marked complete.
    Empty,
    /// Signed JSON webhook with per-status events.
    Default,
    /// Payment gateway callback format.
    CardPay,
    /// Two-step user validation + payment notification.
    ThirdPartyWallet,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Empty => "empty",
            Protocol::Default => "default",
            Protocol::CardPay => "cardpay",
            Protocol::ThirdPartyWallet => "xsolla",
        }
    }

    pub async fn notify(self, ctx: &mut NotifyContext<'_>) -> Result<NotifyOutcome, NotifyError> {
        match self {
            Protocol::Empty => empty::notify(ctx).await,
            Protocol::Default => default::notify(ctx).await,
            Protocol::CardPay => cardpay::notify(ctx).await,
            Protocol::ThirdPartyWallet => wallet::notify(ctx).await,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(Protocol::Empty),
            "default" => Ok(Protocol::Default),
            "cardpay" => Ok(Protocol::CardPay),
            "xsolla" => Ok(Protocol::ThirdPartyWallet),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// How a strategy finished when it did not ask for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Already notified for this status; no request was made.
    Suppressed,
    /// The merchant refused the order, or the retry budget ran out.
    Rejected,
}

/// Everything a strategy needs for one event.
pub struct NotifyContext<'a> {
    pub order: &'a mut Order,
    pub envelope: &'a RetryEnvelope,
    pub max_attempts: u32,
    pub sender: &'a dyn Sender,
    pub repository: &'a dyn OrderRepository,
    pub store: &'a dyn IdempotencyStore,
    pub realtime: &'a RealtimeNotifier,
}

impl NotifyContext<'_> {
    pub fn budget_exhausted(&self) -> bool {
        self.envelope.is_exhausted(self.max_attempts)
    }

    pub async fn persist(&self) {
        persist_order(self.repository, &*self.order).await;
    }

    /// True when this status was already delivered or given up on, either
    /// per the order's own flag or per the idempotency store. The flag is
    /// then persisted so the order carries the fact durably.
    ///
    /// Test-harness orders are never suppressed.
    async fn already_handled(&mut self, status: PublicStatus) -> bool {
        if self.order.is_test_order() || !self.already_notified(status).await {
            return false;
        }
        info!(order_id = %self.order.id, status = %status, "notification already sent, skipping");
        self.order.set_notification_flag(status.as_str(), true);
        self.persist().await;
        true
    }

    /// Store read failures count as "not sent": a duplicate webhook beats a lost one.
    async fn already_notified(&self, status: PublicStatus) -> bool {
        if self.order.notification_flag(status.as_str()) {
            return true;
        }
        match self.store.get(&webhook_key(&self.order.id)).await {
            Ok(record) => record.is_recorded(status.as_str()),
            Err(err) => {
                warn!(order_id = %self.order.id, error = %err, "get notification stat failed");
                false
            }
        }
    }

    /// Write "1" (delivered) or "0" (given up) for `status`, flag the order
    /// and persist it.
    async fn record_outcome(&mut self, status: PublicStatus, delivered: bool) {
        let key = webhook_key(&self.order.id);
        if let Err(err) = self.store.set(&key, status.as_str(), delivered).await {
            warn!(order_id = %self.order.id, error = %err, "set notification stat failed");
        }
        self.order.set_notification_flag(status.as_str(), true);
        self.persist().await;
    }

    /// On the last attempt, reject the order and record the failure so no
    /// later event for this status sends again.
    async fn reject_if_exhausted(&mut self, status: PublicStatus) {
        if self.budget_exhausted() {
            self.order.private_status = OrderStatus::ProjectReject;
            self.record_outcome(status, false).await;
        }
    }

    /// Send `request`. A transport failure on the last attempt is settled
    /// like a bad status before the error is returned.
    async fn send(&mut self, request: WebhookRequest, status: PublicStatus) -> Result<WebhookResponse, NotifyError> {
        match self.sender.send(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.reject_if_exhausted(status).await;
                Err(err.into())
            }
        }
    }

    /// Apply a merchant response shared by the gateway and wallet protocols:
    /// an `accepted` status completes the order, 422 rejects it, anything
    /// else retries.
    async fn settle_response(
        &mut self,
        response: &WebhookResponse,
        action: &'static str,
        status: PublicStatus,
        accepted: &[u16],
    ) -> Result<NotifyOutcome, NotifyError> {
        if accepted.contains(&response.status) {
            self.order.complete_for_project();
            self.record_outcome(status, true).await;
            return Ok(NotifyOutcome::Delivered);
        }

        if response.is_rejected() {
            self.order.private_status = OrderStatus::ProjectReject;
            self.record_outcome(status, false).await;
            return Ok(NotifyOutcome::Rejected);
        }

        self.reject_if_exhausted(status).await;
        Err(self.unexpected_status(response, action))
    }

    fn unexpected_status(&self, response: &WebhookResponse, action: &'static str) -> NotifyError {
        NotifyError::UnexpectedStatus {
            order_id: self.order.id.clone(),
            action,
            status: response.status,
        }
    }
}

/// Boolean transaction params arrive as "1"/"0" or "true"/"false".
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
