use thiserror::Error;

/// Failure talking to the distributed lock backend.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Backend(String),
}

/// Failure talking to the idempotency store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("idempotency store unavailable: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish to {exchange} failed: {reason}")]
    Publish { exchange: String, reason: String },

    #[error("message encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("realtime publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("order repository call {call} failed: {reason}")]
    Call { call: &'static str, reason: String },
}

/// Failure building or executing an outbound webhook request.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("empty string in url")]
    EmptyUrl,

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request body encoding failed: {0}")]
    Encoding(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// Outcome of a protocol strategy that did not end in a clean delivery.
///
/// Retryable errors make the dispatcher hand the event to the retry
/// scheduler; everything else is terminal for this event.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("project is deleted")]
    DeletedProject,

    #[error("notification url is empty")]
    EmptyUrl,

    #[error("no event name for order status {0}")]
    NoEventForStatus(String),

    #[error("unknown payment method")]
    UnknownPaymentMethod,

    #[error("unknown transaction status")]
    UnknownTransactionStatus,

    #[error("param \"{0}\" not found in transaction record")]
    MissingTxnParam(&'static str),

    #[error("invalid transaction param \"{0}\"")]
    InvalidTxnParam(&'static str),

    #[error("bad project response {status} for order {order_id} ({action})")]
    UnexpectedStatus {
        order_id: String,
        action: &'static str,
        status: u16,
    },

    #[error("webhook delivery failed: {0}")]
    Send(#[from] SendError),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("repository call failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("tax forwarding failed: {0}")]
    TaxForwarding(BrokerError),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::UnexpectedStatus { .. }
            | NotifyError::Serialization(_)
            | NotifyError::Repository(_)
            | NotifyError::TaxForwarding(_) => true,
            // A bad url never heals by itself.
            NotifyError::Send(SendError::EmptyUrl | SendError::InvalidUrl { .. }) => false,
            NotifyError::Send(_) => true,
            NotifyError::DeletedProject
            | NotifyError::EmptyUrl
            | NotifyError::NoEventForStatus(_)
            | NotifyError::UnknownPaymentMethod
            | NotifyError::UnknownTransactionStatus
            | NotifyError::MissingTxnParam(_)
            | NotifyError::InvalidTxnParam(_) => false,
        }
    }
}

/// Errors returned from [`crate::Dispatcher::process`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("lock acquisition failed: {0}")]
    Lock(#[from] LockError),

    #[error("handler for callback protocol {0:?} not found")]
    HandlerNotFound(String),

    #[error("order decoding failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("retry republish failed: {0}")]
    Retry(#[from] BrokerError),
}
