//! At-least-once merchant webhooks for payment order lifecycle events.
//!
//! Every order status change arrives as a broker delivery. The
//! [`Dispatcher`] takes a per-order lock, forwards taxable US orders to the
//! tax-reporting queues, runs the merchant's callback [`Protocol`] and pushes
//! the outcome to the realtime channels. Transient failures are retried by
//! republishing to a delayed retry exchange, up to [`MAX_ATTEMPTS`] times.
//!
//! ## Guarantees
//! - At most one worker processes a given order at a time
//! - A status is never notified twice once the idempotency store or the
//!   order's notification flags record it
//! - Retries survive process restarts (they live in the broker)
//! - A delivery that could not take the lock, or whose retry could not be
//!   republished, goes back to the broker instead of being acked
//!
//! ## Non-Guarantees
//! - Exactly-once delivery: a store outage prefers a duplicate webhook
//! - Delivery of realtime pushes
//!
//! Backends are feature gated: `http` (reqwest sender and Centrifugo
//! publisher, on by default), `redis` (lock and idempotency store), `amqp`
//! (RabbitMQ broker) and `metrics` (counters).

mod broker;
mod dispatcher;
mod error;
mod idempotency;
mod lock;
mod protocol;
mod realtime;
mod repository;
mod retry;
mod sender;
mod settings;
mod signing;
mod tax;
mod telemetry;
mod types;

#[cfg(feature = "amqp")]
mod amqp;

#[cfg(feature = "redis")]
mod redis_backend;

pub use broker::{
    Delivery, DeliveryHandler, Disposition, InMemoryPublisher, OutboundMessage, Publisher, Subscriber, RETRY_COUNT_HEADER,
};
pub use dispatcher::{Collaborators, Dispatcher, DispatcherConfig, ProcessOutcome};
pub use error::{
    BrokerError,
    LockError,
    NotifyError,
    ProcessError,
    RealtimeError,
    RepositoryError,
    SendError,
    StoreError,
};
pub use idempotency::{tax_key, webhook_key, IdempotencyStore, InMemoryIdempotencyStore, NotificationRecord};
pub use lock::{lock_name, DistributedLock, InMemoryLock, LockHandle};
pub use protocol::{
    alphabet_status,
    event_name,
    notification_url,
    payout_amount,
    CardPayCallback,
    NotifyContext,
    NotifyOutcome,
    OrderNotificationMessage,
    Protocol,
    UnknownProtocol,
    WalletCheckNotification,
    WalletPaymentNotification,
    ACTION_CHECK,
    ACTION_PAYMENT,
};
pub use realtime::{RealtimeChannels, RealtimeNotifier, RealtimePublisher};
pub use repository::{OrderRepository, TestResult};
pub use retry::{
    RetryEnvelope,
    RetryOutcome,
    RetryPolicy,
    RetryScheduler,
    MAX_ATTEMPTS,
    RETRY_DELAY_SECS,
    RETRY_EXCHANGE,
};
pub use sender::{
    validate_url,
    Sender,
    SignaturePlacement,
    WebhookRequest,
    WebhookResponse,
    HEADER_AUTHORIZATION,
    HEADER_SIGNATURE,
};
pub use settings::{CentrifugoConfig, NotifierConfig};
pub use signing::{
    compute_signature,
    notification_id,
    parse_authorization_header,
    verify_signature,
    SignatureAlgorithm,
};
pub use tax::{TaxForwarder, TaxOutcome};
pub use telemetry::{init_tracing, order_span, LogFormat};
pub use types::{
    FixedPackage,
    Order,
    OrderAmounts,
    OrderDecline,
    OrderStatus,
    PayerData,
    PaymentMethodOrder,
    ProjectOrder,
    ProjectStatus,
    PublicStatus,
};

#[cfg(feature = "http")]
pub use realtime::CentrifugoPublisher;
#[cfg(feature = "http")]
pub use sender::HttpSender;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpTopology};

#[cfg(feature = "redis")]
pub use redis_backend::{connect as redis_connect, ping as redis_ping, RedisIdempotencyStore, RedisLock};
