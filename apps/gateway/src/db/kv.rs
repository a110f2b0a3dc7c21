use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),
}

/// Abstraction over the key-value store holding sessions and failure counters.
///
/// Backed by Redis in production and an in-memory map in tests. Every
/// operation is atomic per key; callers never need their own locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    /// Read a value and reset its TTL to `ttl_secs` in the same round trip.
    async fn get_refresh(&self, key: &str, ttl_secs: u64) -> Result<Option<String>, KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    /// Increment an integer counter. A counter created by this call expires
    /// after `ttl_secs`; incrementing an existing one leaves its TTL alone.
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, KvError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

const INCR_WITH_TTL: &str = r"
local n = redis.call('INCR', KEYS[1])
if n == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return n
";

pub struct RedisStore {
    conn: ConnectionManager,
    incr_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("redis connection established");
        Ok(Self {
            conn,
            incr_script: redis::Script::new(INCR_WITH_TTL),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_refresh(&self, key: &str, ttl_secs: u64) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let (value,): (Option<String>,) = redis::pipe()
            .get(key)
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .incr_script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / local development)
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory store with real expiry semantics.
///
/// Expiry is measured with `tokio::time::Instant`, so tests running with a
/// paused clock can move time forward with `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        self.data.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn get_refresh(&self, key: &str, ttl_secs: u64) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        match data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = now + Duration::from_secs(ttl_secs);
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, KvError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        if let Some(entry) = data.get_mut(key) {
            if entry.is_live(now) {
                let count: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| KvError::NotAnInteger(key.to_string()))?;
                entry.value = (count + 1).to_string();
                return Ok(count + 1);
            }
        }
        data.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: now + Duration::from_secs(ttl_secs),
            },
        );
        Ok(1)
    }
}
