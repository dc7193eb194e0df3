use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;

const WEBHOOK_KEY_PREFIX: &str = "ps:notify:";
const TAX_KEY_PREFIX: &str = "tj:notify:";

const VALUE_DELIVERED: &str = "1";
const VALUE_FAILED: &str = "0";

/// Key of the webhook idempotency hash for an order.
pub fn webhook_key(order_id: &str) -> String {
    format!("{WEBHOOK_KEY_PREFIX}{order_id}")
}

/// Key of the tax-forwarding idempotency hash for an order.
pub fn tax_key(order_id: &str) -> String {
    format!("{TAX_KEY_PREFIX}{order_id}")
}

/// Snapshot of one idempotency hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRecord {
    pub key: String,
    fields: HashMap<String, String>,
}

impl NotificationRecord {
    pub fn new(key: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self { key: key.into(), fields }
    }

    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, HashMap::new())
    }

    /// Whether a send for `field` already finished, delivered or not.
    pub fn is_recorded(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn is_delivered(&self, field: &str) -> bool {
        self.fields.get(field).map(String::as_str) == Some(VALUE_DELIVERED)
    }
}

pub(crate) fn encode_outcome(delivered: bool) -> &'static str {
    if delivered {
        VALUE_DELIVERED
    } else {
        VALUE_FAILED
    }
}

/// "Have we already notified for status X" bookkeeping, keyed per order.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// A missing key yields an empty record, never an error.
    async fn get(&self, key: &str) -> Result<NotificationRecord, StoreError>;

    async fn set(&self, key: &str, field: &str, delivered: bool) -> Result<(), StoreError>;
}

/// In-memory store for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HashMap<String, HashMap<String, String>> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<NotificationRecord, StoreError> {
        let records = self.records.lock().await;
        let fields = records.get(key).cloned().unwrap_or_default();
        Ok(NotificationRecord::new(key, fields))
    }

    async fn set(&self, key: &str, field: &str, delivered: bool) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), encode_outcome(delivered).to_string());
        Ok(())
    }
}
