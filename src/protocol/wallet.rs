use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use super::{NotifyContext, NotifyOutcome, ACTION_CHECK, ACTION_PAYMENT};
use crate::error::NotifyError;
use crate::sender::{SignaturePlacement, WebhookRequest, WebhookResponse};
use crate::signing::SignatureAlgorithm;
use crate::types::{Order, OrderStatus};

pub const NOTIFICATION_USER_VALIDATION: &str = "user_validation";
pub const NOTIFICATION_PAYMENT: &str = "payment";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const ACCEPTED: &[u16] = &[200, 204];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletUser {
    pub id: String,
    pub ip: String,
    pub phone: String,
    pub email: String,
    pub name: String,
    pub country: String,
}

impl WalletUser {
    fn from_order(order: &Order) -> Self {
        Self {
            id: order.project_account.clone(),
            ip: order.payer.ip.clone(),
            phone: order.payer.phone.clone(),
            email: order.payer.email.clone(),
            name: order.project_account.clone(),
            country: order.payer.country_code_a2.clone(),
        }
    }
}

/// First call: ask the merchant whether the paying user exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletCheckNotification {
    pub notification_type: &'static str,
    pub user: WalletUser,
}

impl WalletCheckNotification {
    pub fn from_order(order: &Order) -> Self {
        Self {
            notification_type: NOTIFICATION_USER_VALIDATION,
            user: WalletUser::from_order(order),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Money {
    pub currency: String,
    pub amount: f64,
}

impl Money {
    fn new(currency: &str, amount: f64) -> Self {
        Self {
            currency: currency.to_string(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualCurrency {
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub currency: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualItem {
    pub sku: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualItems {
    pub items: Vec<VirtualItem>,
    pub currency: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Purchase {
    pub virtual_currency: VirtualCurrency,
    pub checkout: Money,
    pub virtual_items: VirtualItems,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub external_id: String,
    pub payment_date: String,
    pub payment_method: String,
    pub dry_run: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentDetails {
    pub payment: Money,
    pub vat: Money,
    pub payout: Money,
    pub payout_currency_rate: f64,
    pub xsolla_fee: Money,
    pub payment_method_fee: Money,
    pub repatriation_commission: Money,
}

/// Second call: the payment itself, with the merchant's net payout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletPaymentNotification {
    pub notification_type: &'static str,
    pub purchase: Purchase,
    pub user: WalletUser,
    pub transaction: Transaction,
    pub payment_details: PaymentDetails,
    pub custom_parameters: HashMap<String, String>,
}

impl WalletPaymentNotification {
    pub fn from_order(order: &Order, payout_currency_rate: f64) -> Self {
        let amounts = &order.amounts;
        let outcome_currency = amounts.project_outcome_currency.as_str();
        let outcome_amount = amounts.project_outcome_amount;
        let income_currency = amounts.payment_method_income_currency.as_str();
        let payout_currency = order.project.merchant_payout_currency.as_str();
        let package = order.fixed_package.clone().unwrap_or_default();

        Self {
            notification_type: NOTIFICATION_PAYMENT,
            purchase: Purchase {
                virtual_currency: VirtualCurrency {
                    name: package.name,
                    sku: package.id.clone(),
                    quantity: 1,
                    currency: package.currency,
                    amount: package.price,
                },
                checkout: Money::new(outcome_currency, outcome_amount),
                virtual_items: VirtualItems {
                    items: vec![VirtualItem {
                        sku: package.id,
                        amount: 1,
                    }],
                    currency: outcome_currency.to_string(),
                    amount: outcome_amount,
                },
                total: Money::new(outcome_currency, outcome_amount),
            },
            user: WalletUser::from_order(order),
            transaction: Transaction {
                id: order.id.clone(),
                external_id: order.project_order_id.clone(),
                payment_date: order
                    .payment_method_order_closed_at
                    .map(|closed| closed.format(DATE_FORMAT).to_string())
                    .unwrap_or_default(),
                payment_method: order
                    .payment_method
                    .as_ref()
                    .map(|m| m.group_alias.clone())
                    .unwrap_or_default(),
                dry_run: 0,
            },
            payment_details: PaymentDetails {
                payment: Money::new(income_currency, amounts.payment_method_income_amount),
                vat: Money::new(income_currency, amounts.vat_payment_method_currency),
                payout: Money::new(payout_currency, payout_amount(order)),
                payout_currency_rate,
                xsolla_fee: Money::new(payout_currency, amounts.psp_fee_merchant_currency),
                payment_method_fee: Money::new(payout_currency, amounts.payment_system_fee_merchant_currency),
                repatriation_commission: Money::new(payout_currency, amounts.to_payer_fee_merchant_currency),
            },
            custom_parameters: order.project_params.clone(),
        }
    }
}

/// Merchant accounting amount net of PSP fee, payment-system fee and VAT.
pub fn payout_amount(order: &Order) -> f64 {
    let amounts = &order.amounts;
    let mut payout = amounts.amount_out_merchant_accounting_currency
        - amounts.psp_fee_merchant_currency
        - amounts.payment_system_fee_merchant_currency;
    if amounts.vat_merchant_currency > 0.0 {
        payout -= amounts.vat_merchant_currency;
    }
    payout
}

fn signed_request<T: Serialize>(url: &str, payload: &T, order: &Order) -> Result<WebhookRequest, NotifyError> {
    Ok(WebhookRequest::signed(
        url,
        payload,
        SignatureAlgorithm::Sha1,
        order.secret_key(),
        SignaturePlacement::Authorization,
    )?)
}

fn is_answered(response: &WebhookResponse) -> bool {
    response.is_delivered() || response.is_rejected()
}

pub(super) async fn notify(ctx: &mut NotifyContext<'_>) -> Result<NotifyOutcome, NotifyError> {
    let status = ctx.order.public_status();
    if ctx.already_handled(status).await {
        return Ok(NotifyOutcome::Suppressed);
    }

    let check = WalletCheckNotification::from_order(&*ctx.order);
    let request = signed_request(&ctx.order.project.url_check_account, &check, &*ctx.order)?;

    debug!(order_id = %ctx.order.id, "sending user validation");
    let response = ctx.send(request, status).await?;
    if !is_answered(&response) {
        ctx.reject_if_exhausted(status).await;
        return Err(ctx.unexpected_status(&response, ACTION_CHECK));
    }
    if response.is_rejected() {
        info!(order_id = %ctx.order.id, "user validation refused by project");
        ctx.order.private_status = OrderStatus::ProjectReject;
        ctx.record_outcome(status, false).await;
        return Ok(NotifyOutcome::Rejected);
    }

    let converted = ctx
        .repository
        .get_convert_rate(
            &ctx.order.amounts.payment_method_outcome_currency,
            &ctx.order.project.merchant_payout_currency,
        )
        .await;
    let rate = match converted {
        Ok(rate) => rate,
        Err(err) => {
            ctx.reject_if_exhausted(status).await;
            return Err(err.into());
        }
    };

    let payment = WalletPaymentNotification::from_order(&*ctx.order, rate);
    let request = signed_request(&ctx.order.project.url_process_payment, &payment, &*ctx.order)?;

    debug!(order_id = %ctx.order.id, "sending payment notification");
    let response = ctx.send(request, status).await?;
    ctx.settle_response(&response, ACTION_PAYMENT, status, ACCEPTED).await
}
