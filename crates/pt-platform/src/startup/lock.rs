//! Distributed lock
//!
//! Optional cross-instance lock, taken around the migration apply step and
//! around each purge pass. Uses SET NX with expiry so a crashed holder cannot
//! block peers for longer than the lease.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pt_config::RedisConfig;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// `true` when this instance now holds the lock
    async fn try_acquire(&self) -> Result<bool, LockError>;

    /// Release only if still held by this instance
    async fn release(&self) -> Result<(), LockError>;
}

pub struct RedisLock {
    conn: ConnectionManager,
    key: String,
    owner: String,
    ttl_seconds: u64,
}

impl RedisLock {
    pub async fn connect(url: &str, key: impl Into<String>, ttl_seconds: u64) -> Result<Self, LockError> {
        let client = redis::Client::open(url).map_err(|e| LockError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;
        let owner = Uuid::new_v4().to_string();
        let key = key.into();

        info!(key = %key, owner = %owner, "Connected distributed lock");

        Ok(Self {
            conn,
            key,
            owner,
            ttl_seconds: ttl_seconds.max(1),
        })
    }

    pub async fn from_config(config: &RedisConfig) -> Result<Self, LockError> {
        Self::connect(&config.url, config.lock_key.clone(), config.lock_ttl_seconds).await
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        // SET key value NX EX seconds
        let result: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.owner)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;

        let acquired = result.is_some();
        debug!(key = %self.key, acquired, "Lock attempt");
        Ok(acquired)
    }

    async fn release(&self) -> Result<(), LockError> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let mut conn = self.conn.clone();
        let released = redis::Script::new(script)
            .key(&self.key)
            .arg(&self.owner)
            .invoke_async::<i32>(&mut conn)
            .await?;

        if released == 1 {
            info!(key = %self.key, "Released lock");
        } else {
            warn!(key = %self.key, "Lock expired before release");
        }
        Ok(())
    }
}
