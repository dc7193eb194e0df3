use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::LockError;

/// Name of the per-order mutex: `{protocol}-{order_id}`.
pub fn lock_name(protocol: &str, order_id: &str) -> String {
    format!("{protocol}-{order_id}")
}

/// Proof of ownership of a held lock.
///
/// The token lets the backend refuse a release coming from a worker whose
/// lock already expired and was taken over by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub token: String,
}

/// Fleet-wide mutex with automatic expiry.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// `Ok(None)` means another worker holds the lock.
    async fn acquire(&self, name: &str) -> Result<Option<LockHandle>, LockError>;

    async fn release(&self, handle: LockHandle) -> Result<(), LockError>;
}

/// Ownership token, unique across the fleet.
pub(crate) fn next_token() -> String {
    Uuid::new_v4().to_string()
}

/// Process-local lock with the same expiry semantics as the redis one.
pub struct InMemoryLock {
    ttl: Duration,
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_held(&self, name: &str) -> bool {
        let held = self.held.lock().await;
        held.get(name)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false)
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, name: &str) -> Result<Option<LockHandle>, LockError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(name) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = next_token();
        held.insert(name.to_string(), (token.clone(), now + self.ttl));
        Ok(Some(LockHandle {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut held = self.held.lock().await;
        if held.get(&handle.name).map(|(token, _)| token == &handle.token) == Some(true) {
            held.remove(&handle.name);
        }
        Ok(())
    }
}
