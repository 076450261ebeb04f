//! Regeneration lock used to damp cache stampedes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::sync::mutex_lock;

const SOURCE: &str = "cache::lock";

/// How long a [`MemoryLock`] claim lasts when nothing else is configured.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Non-blocking, best-effort exclusive claim on a key.
///
/// `acquire` must answer immediately. `false` means another regenerator is
/// presumed to be working on the same key. There is no release: a claim
/// lives until the implementation's TTL runs out.
pub trait RegenerationLock: Send + Sync {
    fn acquire(&self, key: &str) -> bool;
}

/// Process-local [`RegenerationLock`].
///
/// The first caller for a key wins until `ttl` elapses; after that the next
/// caller takes the key over.
pub struct MemoryLock {
    held: Mutex<HashMap<String, i64>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryLock {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TTL)
    }
}

impl RegenerationLock for MemoryLock {
    fn acquire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let mut held = mutex_lock(&self.held, SOURCE, "acquire");

        // Drop stale claims so the map does not grow with every key ever seen.
        held.retain(|_, expires_at| *expires_at > now);

        if held.contains_key(key) {
            return false;
        }
        held.insert(key.to_owned(), now.saturating_add(ttl));
        true
    }
}
