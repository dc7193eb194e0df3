use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn, Instrument};

use crate::broker::{Delivery, DeliveryHandler, Disposition, Publisher};
use crate::error::{NotifyError, ProcessError};
use crate::idempotency::IdempotencyStore;
use crate::lock::{lock_name, DistributedLock};
use crate::protocol::{NotifyContext, NotifyOutcome, Protocol, UnknownProtocol};
use crate::realtime::RealtimeNotifier;
use crate::repository::{persist_order, OrderRepository};
use crate::retry::{RetryEnvelope, RetryOutcome, RetryPolicy, RetryScheduler};
use crate::sender::Sender;
use crate::tax::{TaxForwarder, REFUNDS_TOPIC, TRANSACTIONS_TOPIC};
use crate::telemetry::order_span;
use crate::types::{Order, OrderStatus};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub retry: RetryPolicy,
    pub taxjar_transactions_topic: String,
    pub taxjar_refunds_topic: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            taxjar_transactions_topic: TRANSACTIONS_TOPIC.to_string(),
            taxjar_refunds_topic: REFUNDS_TOPIC.to_string(),
        }
    }
}

/// External capabilities the dispatcher drives.
#[derive(Clone)]
pub struct Collaborators {
    pub lock: Arc<dyn DistributedLock>,
    pub sender: Arc<dyn Sender>,
    pub repository: Arc<dyn OrderRepository>,
    pub store: Arc<dyn IdempotencyStore>,
    pub realtime: Arc<RealtimeNotifier>,
    /// Used for retry republishing and tax forwarding.
    pub publisher: Arc<dyn Publisher>,
}

/// Result of processing one order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Another worker holds the lock for this order; nothing was done.
    AlreadyLocked,
    Delivered,
    Suppressed,
    Rejected,
    RetryScheduled { attempt_count: u32 },
    RetryExhausted,
}

impl From<NotifyOutcome> for ProcessOutcome {
    fn from(outcome: NotifyOutcome) -> Self {
        match outcome {
            NotifyOutcome::Delivered => ProcessOutcome::Delivered,
            NotifyOutcome::Suppressed => ProcessOutcome::Suppressed,
            NotifyOutcome::Rejected => ProcessOutcome::Rejected,
        }
    }
}

/// Runs one order event end to end: lock, tax side flow, protocol
/// strategy, payer push and, on a transient failure, the broker retry.
pub struct Dispatcher {
    lock: Arc<dyn DistributedLock>,
    sender: Arc<dyn Sender>,
    repository: Arc<dyn OrderRepository>,
    store: Arc<dyn IdempotencyStore>,
    realtime: Arc<RealtimeNotifier>,
    scheduler: RetryScheduler,
    tax: TaxForwarder,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            lock,
            sender,
            repository,
            store,
            realtime,
            publisher,
        } = collaborators;

        let scheduler = RetryScheduler::new(publisher.clone(), realtime.clone(), config.retry);
        let tax = TaxForwarder::new(
            publisher,
            config.taxjar_transactions_topic,
            config.taxjar_refunds_topic,
        );

        Self {
            lock,
            sender,
            repository,
            store,
            realtime,
            scheduler,
            tax,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.scheduler.policy()
    }

    /// Process one event for `order`. The order is updated in place with
    /// whatever status and flags were persisted.
    pub async fn process(&self, order: &mut Order, envelope: &RetryEnvelope) -> Result<ProcessOutcome, ProcessError> {
        let name = lock_name(order.callback_protocol(), &order.id);

        let handle = match self.lock.acquire(&name).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(order_id = %order.id, lock = %name, "order is locked by another worker");
                metric_inc("notifier.lock.busy");
                return Ok(ProcessOutcome::AlreadyLocked);
            }
            Err(err) => {
                error!(order_id = %order.id, lock = %name, error = %err, "lock acquisition failed");
                return Err(err.into());
            }
        };

        let result = self.process_locked(order, envelope).await;

        if let Err(err) = self.lock.release(handle).await {
            warn!(order_id = %order.id, lock = %name, error = %err, "mutex unlock failed");
        }
        result
    }

    async fn process_locked(&self, order: &mut Order, envelope: &RetryEnvelope) -> Result<ProcessOutcome, ProcessError> {
        let protocol: Protocol = match order.callback_protocol().parse() {
            Ok(protocol) => protocol,
            Err(UnknownProtocol(name)) => {
                error!(order_id = %order.id, protocol = %name, "notifier handler not found");
                metric_inc("notifier.handler.not_found");
                return Err(ProcessError::HandlerNotFound(name));
            }
        };

        // Retries republish the event as it arrived, not as this attempt left it.
        let received = order.clone();
        let is_test = order.is_test_order();
        let mut needs_retry = false;

        if !is_test {
            if let Err(err) = self
                .tax
                .forward(order, self.store.as_ref(), self.repository.as_ref(), &self.realtime)
                .await
            {
                warn!(order_id = %order.id, error = %err, "tax forwarding failed, event marked for retry");
                needs_retry = true;
            }
        }

        let notified = {
            let mut ctx = NotifyContext {
                order: &mut *order,
                envelope,
                max_attempts: self.scheduler.policy().max_attempts,
                sender: self.sender.as_ref(),
                repository: self.repository.as_ref(),
                store: self.store.as_ref(),
                realtime: self.realtime.as_ref(),
            };
            protocol.notify(&mut ctx).await
        };

        let mut terminal: Option<NotifyError> = None;
        let mut outcome = None;
        match notified {
            Ok(notify_outcome) => {
                info!(order_id = %order.id, protocol = %protocol, outcome = ?notify_outcome, "notification processed");
                metric_inc("notifier.notify.ok");
                outcome = Some(ProcessOutcome::from(notify_outcome));
            }
            Err(err) if err.is_retryable() && !is_test => {
                warn!(
                    order_id = %order.id,
                    protocol = %protocol,
                    attempt = envelope.attempt_count,
                    error = %err,
                    "project notification failed"
                );
                metric_inc("notifier.notify.retryable");
                needs_retry = true;
            }
            Err(err) => {
                error!(order_id = %order.id, protocol = %protocol, error = %err, "project notification failed");
                metric_inc("notifier.notify.terminal");
                terminal = Some(err);
            }
        }

        if envelope.attempt_count == 0 && order.private_status.is_terminal() {
            self.realtime.notify_user(order).await;
        }

        if needs_retry {
            let retried = self.scheduler.retry(envelope, &received).await?;
            let retry_outcome = match retried {
                RetryOutcome::Republished { attempt_count } => ProcessOutcome::RetryScheduled { attempt_count },
                RetryOutcome::Exhausted => {
                    // Transport failures leave the status alone in the strategy.
                    if outcome.is_none() && order.private_status != OrderStatus::ProjectReject {
                        order.private_status = OrderStatus::ProjectReject;
                        persist_order(self.repository.as_ref(), order).await;
                    }
                    ProcessOutcome::RetryExhausted
                }
            };
            if outcome.is_none() {
                outcome = Some(retry_outcome);
            }
        }

        match (terminal, outcome) {
            (Some(err), _) => Err(err.into()),
            (None, Some(outcome)) => Ok(outcome),
            (None, None) => Ok(ProcessOutcome::RetryExhausted),
        }
    }
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn handle(&self, delivery: Delivery) -> Disposition {
        let mut order: Order = match serde_json::from_slice(&delivery.body) {
            Ok(order) => order,
            Err(err) => {
                let err = ProcessError::Decode(err.to_string());
                error!(routing_key = %delivery.routing_key, error = %err, "dropping undecodable delivery");
                metric_inc("notifier.delivery.undecodable");
                return Disposition::Ack;
            }
        };

        let envelope = RetryEnvelope::from_delivery(&delivery);
        let span = order_span(&order.id, order.callback_protocol(), envelope.attempt_count);
        match self.process(&mut order, &envelope).instrument(span).await {
            Ok(outcome) => {
                debug!(order_id = %order.id, attempt = envelope.attempt_count, outcome = ?outcome, "delivery handled");
                Disposition::Ack
            }
            Err(err @ (ProcessError::Lock(_) | ProcessError::Retry(_))) => {
                warn!(order_id = %order.id, attempt = envelope.attempt_count, error = %err, "delivery requeued");
                metric_inc("notifier.delivery.requeued");
                Disposition::Requeue
            }
            Err(err) => {
                error!(order_id = %order.id, attempt = envelope.attempt_count, error = %err, "delivery processing failed");
                Disposition::Ack
            }
        }
    }
}
