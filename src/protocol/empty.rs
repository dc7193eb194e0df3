use tracing::debug;

use super::{NotifyContext, NotifyOutcome};
use crate::error::NotifyError;

/// Merchants without a webhook: complete the order and stop.
pub(super) async fn notify(ctx: &mut NotifyContext<'_>) -> Result<NotifyOutcome, NotifyError> {
    debug!(order_id = %ctx.order.id, "empty protocol, no request sent");

    if !ctx.order.complete_for_project() {
        return Ok(NotifyOutcome::Suppressed);
    }

    ctx.persist().await;
    Ok(NotifyOutcome::Delivered)
}
