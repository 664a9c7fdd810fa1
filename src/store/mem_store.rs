use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cursor::{Cursor, duration_nanos};
use crate::error::ThrottleError;
use crate::store::{StoreSnapshot, TargetStore};

#[derive(Debug, Clone, Copy)]
struct Entry {
    cursor: Cursor,
    version: u64,
    expires_at: u64,
}

impl Entry {
    fn is_live(&self, now_nanos: u64) -> bool {
        self.expires_at > now_nanos
    }
}

/// [`TargetStore`] kept in process memory.
///
/// Clones share the same entries, so limiters built on clones of one
/// `MemoryStore` behave like separate processes sharing one external store.
/// State does not leave the process.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    start_instant: Instant,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            start_instant: Instant::now(),
        }
    }

    fn now_nanos(&self) -> u64 {
        duration_nanos(self.start_instant.elapsed())
    }

    /// Returns the number of keys that have not expired.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.now_nanos();
        self.entries.iter().filter(|entry| entry.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired keys.
    pub fn cleanup(&self) {
        let now = self.now_nanos();
        self.entries.retain(|_, entry| entry.is_live(now));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<StoreSnapshot, ThrottleError> {
        let now_nanos = self.now_nanos();
        let snapshot = match self.entries.get(key) {
            Some(entry) if entry.is_live(now_nanos) => StoreSnapshot {
                now_nanos,
                cursor: entry.cursor,
                version: entry.version,
            },
            _ => StoreSnapshot {
                now_nanos,
                ..StoreSnapshot::default()
            },
        };
        Ok(snapshot)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        cursor: &Cursor,
        ttl: Duration,
    ) -> Result<bool, ThrottleError> {
        let now = self.now_nanos();
        let expires_at = now.saturating_add(duration_nanos(ttl));

        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            cursor: Cursor::default(),
            version: 0,
            expires_at: 0,
        });

        // An expired key reads as version 0, but keeps counting versions so
        // a writer holding a pre-expiry snapshot still loses.
        let current = if entry.is_live(now) { entry.version } else { 0 };
        if current != expected_version {
            return Ok(false);
        }

        entry.version += 1;
        entry.cursor = *cursor;
        entry.expires_at = expires_at;
        Ok(true)
    }

    async fn flush(&self) -> Result<(), ThrottleError> {
        self.entries.clear();
        Ok(())
    }
}
