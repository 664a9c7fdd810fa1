//! Shared stores holding distributed limiter state.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use crate::cursor::Cursor;
use crate::error::ThrottleError;

mod mem_store;
#[cfg(feature = "redis")]
mod redis_store;

pub use mem_store::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::{DEFAULT_PREFIX, RedisStore};

/// The state of one key as read from a [`TargetStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// The store's clock at the time of the read, in nanoseconds.
    pub now_nanos: u64,
    /// The stored cursor, or an empty one if the key does not exist.
    pub cursor: Cursor,
    /// Version of the stored cursor. `0` means the key does not exist.
    pub version: u64,
}

/// A key-value store that every cooperating process can reach.
///
/// Limiters read a [`StoreSnapshot`], compute a new [`Cursor`] locally and
/// write it back with [`TargetStore::compare_and_swap`]. A failed swap means
/// another writer got there first and the limiter reads again.
///
/// All timestamps in a store's cursors use the store's own clock, so
/// processes never compare their local clocks with each other.
#[async_trait]
pub trait TargetStore: Debug + Send + Sync {
    /// Read the current state of `key` together with the store's clock.
    async fn load(&self, key: &str) -> Result<StoreSnapshot, ThrottleError>;

    /// Replace the cursor of `key` if its version is still
    /// `expected_version`, and expire the key after `ttl`.
    ///
    /// Returns `false` if the key was modified since it was read.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        cursor: &Cursor,
        ttl: Duration,
    ) -> Result<bool, ThrottleError>;

    /// Remove every key this store manages.
    async fn flush(&self) -> Result<(), ThrottleError>;
}
