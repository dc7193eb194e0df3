use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment order as published by the billing service.
///
/// The notifier does not own orders. It receives a snapshot with every
/// broker delivery, mutates the private status and notification flags, and
/// hands the snapshot back to the order repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub id: String,
    pub uuid: String,
    pub private_status: OrderStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub project: ProjectOrder,
    pub project_order_id: String,
    pub project_account: String,
    pub project_params: HashMap<String, String>,
    pub payer: PayerData,
    pub payment_method: Option<PaymentMethodOrder>,
    pub payment_method_payer_account: String,
    pub payment_method_txn_params: HashMap<String, String>,
    pub payment_method_order_closed_at: Option<DateTime<Utc>>,
    pub country_code: String,
    pub tax_rate: f64,
    pub amounts: OrderAmounts,
    pub fixed_package: Option<FixedPackage>,

    /// Non-empty for synthetic orders created by the merchant testing harness.
    pub testing_case: String,

    /// Public status (or `taxjar.*` token) to "already notified".
    pub notification_flags: HashMap<String, bool>,

    pub decline: Option<OrderDecline>,
}

impl Order {
    pub fn public_status(&self) -> PublicStatus {
        self.private_status.public_status()
    }

    pub fn is_test_order(&self) -> bool {
        !self.testing_case.is_empty()
    }

    pub fn notification_flag(&self, key: &str) -> bool {
        self.notification_flags.get(key).copied().unwrap_or(false)
    }

    pub fn set_notification_flag(&mut self, key: impl Into<String>, value: bool) {
        self.notification_flags.insert(key.into(), value);
    }

    pub fn callback_protocol(&self) -> &str {
        &self.project.callback_protocol
    }

    pub fn secret_key(&self) -> &str {
        &self.project.secret_key
    }

    /// Flip `PaymentSystemComplete` to `ProjectComplete`.
    ///
    /// Any other current status is left untouched so a concurrent transition
    /// (refund, chargeback) is never clobbered. Returns whether the status changed.
    pub fn complete_for_project(&mut self) -> bool {
        if self.private_status == OrderStatus::PaymentSystemComplete {
            self.private_status = OrderStatus::ProjectComplete;
            return true;
        }
        false
    }
}

/// Project (merchant integration) the order belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectOrder {
    pub id: String,
    pub merchant_id: String,
    pub secret_key: String,
    pub callback_protocol: String,
    pub status: ProjectStatus,
    pub url_check_account: String,
    pub url_process_payment: String,
    pub url_chargeback_payment: String,
    pub url_cancel_payment: String,
    pub url_refund_payment: String,
    pub merchant_payout_currency: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    TestCompleted,
    TestFailed,
    InProduction,
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayerData {
    pub ip: String,
    pub email: String,
    pub phone: String,
    pub timezone: String,
    pub country_code_a2: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentMethodOrder {
    pub id: String,
    pub name: String,
    pub group_alias: String,
}

/// Money figures the wallet and gateway protocols report back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderAmounts {
    pub project_outcome_amount: f64,
    pub project_outcome_currency: String,
    pub payment_method_income_amount: f64,
    pub payment_method_income_currency: String,
    pub payment_method_outcome_currency: String,
    pub amount_out_merchant_accounting_currency: f64,
    pub psp_fee_merchant_currency: f64,
    pub payment_system_fee_merchant_currency: f64,
    pub to_payer_fee_merchant_currency: f64,
    pub vat_merchant_currency: f64,
    pub vat_payment_method_currency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedPackage {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDecline {
    pub code: String,
    pub reason: String,
}

/// Internal order lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    New,
    PaymentSystemCreate,
    PaymentSystemRejectOnCreate,
    PaymentSystemReject,
    PaymentSystemComplete,
    ProjectInProgress,
    ProjectComplete,
    ProjectPending,
    ProjectReject,
    Refund,
    Chargeback,
    PaymentSystemDeclined,
    PaymentSystemCanceled,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn public_status(self) -> PublicStatus {
        match self {
            OrderStatus::New | OrderStatus::PaymentSystemCreate => PublicStatus::Created,
            OrderStatus::PaymentSystemRejectOnCreate
            | OrderStatus::PaymentSystemReject
            | OrderStatus::ProjectReject
            | OrderStatus::PaymentSystemDeclined => PublicStatus::Rejected,
            OrderStatus::PaymentSystemComplete
            | OrderStatus::ProjectInProgress
            | OrderStatus::ProjectComplete
            | OrderStatus::ProjectPending => PublicStatus::Processed,
            OrderStatus::Refund => PublicStatus::Refunded,
            OrderStatus::Chargeback => PublicStatus::Chargeback,
            OrderStatus::PaymentSystemCanceled => PublicStatus::Canceled,
            OrderStatus::Unknown => PublicStatus::Unknown,
        }
    }

    /// Statuses after which the payer-facing form stops waiting.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::PaymentSystemComplete
                | OrderStatus::ProjectComplete
                | OrderStatus::ProjectReject
                | OrderStatus::PaymentSystemRejectOnCreate
                | OrderStatus::PaymentSystemReject
                | OrderStatus::PaymentSystemDeclined
                | OrderStatus::PaymentSystemCanceled
                | OrderStatus::Refund
                | OrderStatus::Chargeback
        )
    }
}

/// Coarse status merchants see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Created,
    Processed,
    Chargeback,
    Canceled,
    Rejected,
    Refunded,
    Unknown,
}

impl PublicStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PublicStatus::Created => "created",
            PublicStatus::Processed => "processed",
            PublicStatus::Chargeback => "chargeback",
            PublicStatus::Canceled => "canceled",
            PublicStatus::Rejected => "rejected",
            PublicStatus::Refunded => "refunded",
            PublicStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PublicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
