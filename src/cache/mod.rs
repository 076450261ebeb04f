//! Versioned HTTP response caching.
//!
//! Every cacheable response is identified by caller-supplied key and version
//! data ([`CacheIdentity`]). Two hashes are derived from it:
//!
//! - the *entity tag* (key + version), exposed to clients as the `ETag`;
//! - the *cache key* (key only), the slot in the [`BackingStore`] that holds
//!   the latest stored version.
//!
//! A request is answered with a `304` when the client already holds the
//! current entity tag, from the store when the stored record carries it (or
//! is recent enough while someone else regenerates), and otherwise by
//! regenerating. Regenerated responses are compressed once, written to the
//! cache key and served.
//!
//! [`ResponseCacheMiddleware`] wires the capture side into a middleware
//! chain; handlers call [`ResponseCache::respond`] for the lookup side.

mod capture;
mod clock;
mod compression;
mod config;
mod context;
mod error;
mod etag;
mod handler;
mod keys;
mod lock;
mod middleware;
mod record;
mod store;
mod sync;

use std::sync::Arc;

pub use capture::{CACHEABLE_HEADERS, RequestHints};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{Encoding, compress, decompress, gunzip, gzip};
pub use config::{CacheOptions, CacheSettings, ConfigError};
pub use context::{CacheContext, CacheSlot, ServedFrom};
pub use error::{CacheError, CacheResult};
pub use etag::matches as etag_matches;
pub use keys::{CacheIdentity, DEFAULT_NAMESPACE, DerivedKeys, KeyValue, canonicalize, hash, hash_key};
pub use lock::{DEFAULT_LOCK_TTL, MemoryLock, RegenerationLock};
pub use middleware::{ResponseCacheMiddleware, is_cacheable_request};
pub use record::CacheRecord;
pub use store::{BackingStore, MemoryStore, StoreError};

/// The cache engine: settings plus its collaborators.
///
/// Built once per process and shared behind an [`Arc`]. Holds no
/// per-request state; that lives in [`CacheContext`].
pub struct ResponseCache {
    settings: CacheSettings,
    store: Arc<dyn BackingStore>,
    lock: Arc<dyn RegenerationLock>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(
        settings: CacheSettings,
        store: Arc<dyn BackingStore>,
        lock: Arc<dyn RegenerationLock>,
    ) -> Self {
        Self {
            settings,
            store,
            lock,
            clock: Arc::new(SystemClock),
        }
    }

    /// Single-process setup: [`MemoryStore`] plus a [`MemoryLock`] whose
    /// claims last `settings.lock_ttl_secs`.
    pub fn in_memory(settings: CacheSettings) -> Self {
        let lock = MemoryLock::new(settings.lock_ttl());
        Self::new(settings, Arc::new(MemoryStore::new()), Arc::new(lock))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }
}
