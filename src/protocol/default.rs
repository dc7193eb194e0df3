use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::{NotifyContext, NotifyOutcome, ACTION_PAYMENT};
use crate::error::{NotifyError, SendError};
use crate::repository::TestResult;
use crate::sender::{SignaturePlacement, WebhookRequest, WebhookResponse};
use crate::signing::{notification_id, SignatureAlgorithm};
use crate::types::{Order, ProjectOrder, ProjectStatus, PublicStatus};

pub const EVENT_SUCCESS: &str = "payment.success";
pub const EVENT_CHARGEBACK: &str = "payment.chargeback";
pub const EVENT_CANCEL: &str = "payment.cancel";
pub const EVENT_REFUND: &str = "payment.refund";

pub const MSG_DELETED_PROJECT: &str = "notification for deleted project";
pub const MSG_EMPTY_URL: &str = "notification url is empty";

/// Envelope of the default JSON webhook.
#[derive(Debug, Serialize)]
pub struct OrderNotificationMessage<'a> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: &'static str,
    pub live: bool,
    pub created_at: String,
    pub expires_at: String,
    pub delivery_try: u32,
    pub object: &'a Order,
}

impl<'a> OrderNotificationMessage<'a> {
    pub fn new(order: &'a Order, event: &'static str, delivery_try: u32) -> Self {
        Self {
            id: notification_id(&order.id, event),
            kind: "notification",
            event,
            live: order.project.status == ProjectStatus::InProduction,
            created_at: Utc::now().to_rfc3339(),
            expires_at: String::new(),
            delivery_try,
            object: order,
        }
    }
}

pub fn event_name(status: PublicStatus) -> Option<&'static str> {
    match status {
        PublicStatus::Processed => Some(EVENT_SUCCESS),
        PublicStatus::Chargeback => Some(EVENT_CHARGEBACK),
        PublicStatus::Canceled | PublicStatus::Rejected => Some(EVENT_CANCEL),
        PublicStatus::Refunded => Some(EVENT_REFUND),
        PublicStatus::Created | PublicStatus::Unknown => None,
    }
}

/// Status-specific url, falling back to the process-payment url.
pub fn notification_url(project: &ProjectOrder, status: PublicStatus) -> &str {
    let specific = match status {
        PublicStatus::Chargeback => project.url_chargeback_payment.as_str(),
        PublicStatus::Canceled | PublicStatus::Rejected => project.url_cancel_payment.as_str(),
        PublicStatus::Refunded => project.url_refund_payment.as_str(),
        _ => "",
    };
    if specific.is_empty() {
        project.url_process_payment.as_str()
    } else {
        specific
    }
}

pub(super) async fn notify(ctx: &mut NotifyContext<'_>) -> Result<NotifyOutcome, NotifyError> {
    if ctx.order.project.status == ProjectStatus::Deleted {
        ctx.realtime.notify_admin(&*ctx.order, MSG_DELETED_PROJECT).await;
        return Err(NotifyError::DeletedProject);
    }

    let status = ctx.order.public_status();
    if ctx.already_handled(status).await {
        return Ok(NotifyOutcome::Suppressed);
    }

    let event = event_name(status).ok_or_else(|| NotifyError::NoEventForStatus(status.to_string()))?;

    let url = notification_url(&ctx.order.project, status).to_string();
    if url.is_empty() {
        ctx.realtime.notify_admin(&*ctx.order, MSG_EMPTY_URL).await;
        return Err(NotifyError::EmptyUrl);
    }

    let message = OrderNotificationMessage::new(&*ctx.order, event, ctx.envelope.attempt_count);
    let request = WebhookRequest::signed(
        &url,
        &message,
        SignatureAlgorithm::Sha256,
        ctx.order.secret_key(),
        SignaturePlacement::Authorization,
    )?;

    debug!(order_id = %ctx.order.id, event, url = %url, "sending notification");

    if ctx.order.is_test_order() {
        let result = ctx.sender.send(request).await;
        return report_test_result(ctx, event, result).await;
    }

    let response = ctx.send(request, status).await?;
    if response.is_delivered() {
        ctx.order.complete_for_project();
        ctx.record_outcome(status, true).await;
        return Ok(NotifyOutcome::Delivered);
    }

    ctx.reject_if_exhausted(status).await;
    Err(ctx.unexpected_status(&response, ACTION_PAYMENT))
}

async fn report_test_result(
    ctx: &mut NotifyContext<'_>,
    event: &'static str,
    result: Result<WebhookResponse, SendError>,
) -> Result<NotifyOutcome, NotifyError> {
    let (passed, response) = match &result {
        Ok(response) => (response.is_delivered(), response.status.to_string()),
        Err(err) => (false, err.to_string()),
    };

    let test = TestResult {
        test_case: ctx.order.testing_case.clone(),
        project_id: ctx.order.project.id.clone(),
        notification_type: event.to_string(),
        passed,
    };
    if let Err(err) = ctx.repository.notify_test_results(&test).await {
        warn!(order_id = %ctx.order.id, error = %err, "report test results failed");
    }
    ctx.realtime.notify_merchant_testing(&*ctx.order, &response).await;

    if !passed {
        return Ok(NotifyOutcome::Rejected);
    }
    ctx.order.complete_for_project();
    ctx.persist().await;
    Ok(NotifyOutcome::Delivered)
}
