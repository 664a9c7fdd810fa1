use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::cursor::Cursor;
use crate::error::ThrottleError;
use crate::store::{StoreSnapshot, TargetStore};

/// Default prefix prepended to every key.
pub const DEFAULT_PREFIX: &str = "host_throttle";

/// Writes the cursor only if the stored version still matches ARGV[1].
/// An empty ARGV[2] or ARGV[3] clears that field.
static COMPARE_AND_SWAP: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        local key = KEYS[1]
        local expected = tonumber(ARGV[1])
        local current = tonumber(redis.call("HGET", key, "version")) or 0

        if current ~= expected then
            return 0
        end

        redis.call("HSET", key, "version", current + 1)

        if ARGV[2] == "" then
            redis.call("HDEL", key, "next")
        else
            redis.call("HSET", key, "next", ARGV[2])
        end

        if ARGV[3] == "" then
            redis.call("HDEL", key, "paused")
        else
            redis.call("HSET", key, "paused", ARGV[3])
        end

        redis.call("PEXPIRE", key, ARGV[4])

        return 1
        "#,
    )
});

/// [`TargetStore`] backed by Redis.
///
/// Each target is a hash `{prefix}:{key}` with fields `next`, `paused` and
/// `version`. Reads use the server's `TIME` so every process shares one
/// clock; writes go through a Lua compare-and-set on `version`.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    prefix: Arc<str>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Create a store from an existing connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            prefix: Arc::from(DEFAULT_PREFIX),
        }
    }

    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Store`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, ThrottleError> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(client.get_connection_manager().await?))
    }

    /// Connect to the Redis server named by the `REDIS_URL` environment variable.
    pub async fn from_env() -> Result<Self, ThrottleError> {
        let url = std::env::var("REDIS_URL")
            .map_err(|_| ThrottleError::Backend("REDIS_URL is not set".to_string()))?;
        Self::connect(&url).await
    }

    /// Use `prefix` instead of [`DEFAULT_PREFIX`] for every key.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = Arc::from(prefix.as_ref());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl TargetStore for RedisStore {
    async fn load(&self, key: &str) -> Result<StoreSnapshot, ThrottleError> {
        let mut conn = self.connection_manager.clone();

        let ((seconds, micros), (next, paused, version)): (
            (u64, u64),
            (Option<u64>, Option<u64>, Option<u64>),
        ) = redis::pipe()
            .cmd("TIME")
            .cmd("HMGET")
            .arg(self.key(key))
            .arg("next")
            .arg("paused")
            .arg("version")
            .query_async(&mut conn)
            .await?;

        Ok(StoreSnapshot {
            now_nanos: seconds
                .saturating_mul(1_000_000_000)
                .saturating_add(micros.saturating_mul(1_000)),
            cursor: Cursor {
                next_allowed: next,
                paused_until: paused,
            },
            version: version.unwrap_or(0),
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        cursor: &Cursor,
        ttl: Duration,
    ) -> Result<bool, ThrottleError> {
        let mut conn = self.connection_manager.clone();
        let field = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_default();
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;

        let swapped: i64 = COMPARE_AND_SWAP
            .key(self.key(key))
            .arg(expected_version)
            .arg(field(cursor.next_allowed))
            .arg(field(cursor.paused_until))
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(swapped == 1)
    }

    /// Delete every key under this store's prefix.
    async fn flush(&self) -> Result<(), ThrottleError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}:*", self.prefix);

        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}
