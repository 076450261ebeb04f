//! Backing store seam for cache records.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

use super::clock::{Clock, SystemClock};
use super::sync::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Failure talking to a backing store.
///
/// The handler and capture pipeline log these and carry on as if the
/// record were absent (or the write had not happened).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for encoded cache records.
///
/// Implementations are expected to bound their own latency; callers treat an
/// error exactly like a miss.
pub trait BackingStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `payload` under `key`, replacing any previous value. A
    /// `expires_in` of `None` keeps the value until the store evicts it.
    fn write(&self, key: &str, payload: Vec<u8>, expires_in: Option<Duration>)
    -> Result<(), StoreError>;
}

struct Entry {
    payload: Vec<u8>,
    expires_at: Option<i64>,
}

/// Process-local [`BackingStore`].
///
/// Expired entries are hidden on read and replaced on the next write for the
/// same key. Nothing is ever evicted.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let entries = rw_read(&self.entries, SOURCE, "read");
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at.is_none_or(|at| now < at))
            .map(|entry| entry.payload.clone()))
    }

    fn write(
        &self,
        key: &str,
        payload: Vec<u8>,
        expires_in: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = expires_in.map(|ttl| {
            let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            self.clock.now().saturating_add(secs)
        });
        rw_write(&self.entries, SOURCE, "write")
            .insert(key.to_owned(), Entry { payload, expires_at });
        Ok(())
    }
}
