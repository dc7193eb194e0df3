use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{parse_bool, NotifyContext, NotifyOutcome, ACTION_PAYMENT};
use crate::error::NotifyError;
use crate::sender::{SignaturePlacement, WebhookRequest};
use crate::signing::SignatureAlgorithm;
use crate::types::{Order, OrderStatus};

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The gateway format only counts a plain 200 as accepted.
const ACCEPTED: &[u16] = &[200];

const GROUP_BANK_CARD: &str = "BANKCARD";
const GROUP_QIWI: &str = "QIWI";
const GROUP_WEBMONEY: &str = "WEBMONEY";
const GROUP_NETELLER: &str = "NETELLER";
const GROUP_ALIPAY: &str = "ALIPAY";
const GROUP_BITCOIN: &str = "BITCOIN";

/// Gateway transaction status for a private order status.
pub fn alphabet_status(status: OrderStatus) -> Option<&'static str> {
    let value = match status {
        OrderStatus::New => "NEW",
        OrderStatus::PaymentSystemCreate => "IN_PROGRESS",
        OrderStatus::PaymentSystemRejectOnCreate
        | OrderStatus::PaymentSystemReject
        | OrderStatus::PaymentSystemDeclined => "DECLINED",
        OrderStatus::PaymentSystemComplete
        | OrderStatus::ProjectInProgress
        | OrderStatus::ProjectComplete
        | OrderStatus::ProjectPending => "COMPLETED",
        OrderStatus::ProjectReject | OrderStatus::Refund => "REFUNDED",
        OrderStatus::Chargeback => "CHARGEBACK_RESOLVED",
        OrderStatus::PaymentSystemCanceled => "CANCELLED",
        OrderStatus::Unknown => return None,
    };
    Some(value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardPayCallback {
    pub payment_method: String,
    pub callback_time: String,
    pub merchant_order: MerchantOrder,
    pub customer: Customer,
    pub payment_data: PaymentData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_account: Option<CardAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ewallet_account: Option<EWalletAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cryptocurrency_account: Option<CryptoCurrencyAccount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantOrder {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: String,
    pub ip: String,
    pub email: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentData {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub created: String,
    pub status: &'static str,
    pub is_3d: bool,
    pub rrn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardAccount {
    pub masked_pan: String,
    pub holder: String,
    pub issuing_country_code: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EWalletAccount {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CryptoCurrencyAccount {
    pub crypto_address: String,
    pub crypto_transaction_id: String,
    pub prc_amount: String,
    pub prc_currency: String,
}

impl CardPayCallback {
    pub fn from_order(order: &Order, now: DateTime<Utc>) -> Result<Self, NotifyError> {
        let payment_method = order
            .payment_method
            .as_ref()
            .map(|m| m.group_alias.clone())
            .unwrap_or_default();

        let mut callback = Self {
            callback_time: now.format(DATE_FORMAT).to_string(),
            merchant_order: MerchantOrder {
                id: order.project_order_id.clone(),
                description: order.description.clone(),
            },
            customer: Customer {
                id: order.project_account.clone(),
                ip: order.payer.ip.clone(),
                email: order.payer.email.clone(),
                locale: order.payer.timezone.clone(),
            },
            payment_data: payment_data(order)?,
            card_account: None,
            ewallet_account: None,
            cryptocurrency_account: None,
            payment_method,
        };

        match callback.payment_method.as_str() {
            GROUP_BANK_CARD => {
                callback.card_account = Some(CardAccount {
                    masked_pan: order.payment_method_payer_account.clone(),
                    holder: txn_param(order, "card_holder")?,
                    issuing_country_code: txn_param(order, "emission_country")?,
                    token: txn_param(order, "token")?,
                });
            }
            GROUP_QIWI | GROUP_WEBMONEY | GROUP_NETELLER | GROUP_ALIPAY => {
                callback.ewallet_account = Some(EWalletAccount {
                    id: order.payment_method_payer_account.clone(),
                });
            }
            GROUP_BITCOIN => {
                callback.cryptocurrency_account = Some(CryptoCurrencyAccount {
                    crypto_address: order.payment_method_payer_account.clone(),
                    crypto_transaction_id: txn_param(order, "transaction_id")?,
                    prc_amount: txn_param(order, "amount_crypto")?,
                    prc_currency: txn_param(order, "currency_crypto")?,
                });
            }
            _ => return Err(NotifyError::UnknownPaymentMethod),
        }

        Ok(callback)
    }
}

fn payment_data(order: &Order) -> Result<PaymentData, NotifyError> {
    let status = alphabet_status(order.private_status).ok_or(NotifyError::UnknownTransactionStatus)?;
    let is_3d = parse_bool(&txn_param(order, "is_3ds")?).ok_or(NotifyError::InvalidTxnParam("is_3ds"))?;
    let params = &order.payment_method_txn_params;

    Ok(PaymentData {
        id: order.id.clone(),
        amount: order.amounts.project_outcome_amount,
        currency: order.amounts.project_outcome_currency.clone(),
        description: order.description.clone(),
        created: order.created_at.format(DATE_FORMAT).to_string(),
        status,
        is_3d,
        rrn: txn_param(order, "rrn")?,
        decline_code: params.get("decline_code").cloned(),
        decline_reason: params.get("decline_reason").cloned(),
    })
}

fn txn_param(order: &Order, name: &'static str) -> Result<String, NotifyError> {
    order
        .payment_method_txn_params
        .get(name)
        .cloned()
        .ok_or(NotifyError::MissingTxnParam(name))
}

pub(super) async fn notify(ctx: &mut NotifyContext<'_>) -> Result<NotifyOutcome, NotifyError> {
    let status = ctx.order.public_status();
    if ctx.already_handled(status).await {
        return Ok(NotifyOutcome::Suppressed);
    }

    let callback = CardPayCallback::from_order(&*ctx.order, Utc::now())?;
    let request = WebhookRequest::signed(
        &ctx.order.project.url_process_payment,
        &callback,
        SignatureAlgorithm::Sha512,
        ctx.order.secret_key(),
        SignaturePlacement::SignatureHeader,
    )?;

    let response = ctx.send(request, status).await?;
    ctx.settle_response(&response, ACTION_PAYMENT, status, ACCEPTED).await
}
