#[cfg(feature = "redis")]
use std::collections::HashMap;
#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::error::{LockError, StoreError};
#[cfg(feature = "redis")]
use crate::idempotency::{encode_outcome, IdempotencyStore, NotificationRecord};
#[cfg(feature = "redis")]
use crate::lock::{next_token, DistributedLock, LockHandle};

/// Delete the key only if it still carries our token.
#[cfg(feature = "redis")]
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// `SET NX PX` lock; expiry bounds the damage of a crashed worker.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

#[cfg(feature = "redis")]
impl RedisLock {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, name: &str) -> Result<Option<LockHandle>, LockError> {
        let mut conn = self.conn.clone();
        let token = next_token();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(name))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(reply.map(|_| LockHandle {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(&handle.name))
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Idempotency hashes stored as plain redis hashes.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
}

#[cfg(feature = "redis")]
impl RedisIdempotencyStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> Result<NotificationRecord, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(NotificationRecord::new(key, fields))
    }

    async fn set(&self, key: &str, field: &str, delivered: bool) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, encode_outcome(delivered))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Open a reconnecting connection shared by the lock and the store.
#[cfg(feature = "redis")]
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))
}

/// Liveness probe for health checks.
#[cfg(feature = "redis")]
pub async fn ping(conn: &ConnectionManager) -> Result<(), StoreError> {
    let mut conn = conn.clone();
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(())
}
