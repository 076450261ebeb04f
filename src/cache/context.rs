//! Per-request cache state shared between the handler and the capture
//! pipeline.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::sync::mutex_lock;

const SOURCE: &str = "cache::context";

/// Which layer answered a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    /// The client's copy was still current (304).
    Client,
    /// A stored record was served.
    Server,
}

impl ServedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for ServedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags describing how one request interacted with the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheContext {
    /// The request went through the cache handler.
    pub cache: bool,
    /// No cached response was used.
    pub miss: bool,
    pub store: Option<ServedFrom>,
    /// Versioned key (the ETag).
    pub key: Option<String>,
    /// Unversioned key (the store slot).
    pub unversioned_key: Option<String>,
    /// This request holds, or took over, the regeneration lock.
    pub locked: bool,
    pub versioned_cache_expiry: Option<Duration>,
    /// The client accepts gzip bodies.
    pub accepts_gzip: bool,
}

impl CacheContext {
    pub fn new(accepts_gzip: bool) -> Self {
        Self {
            accepts_gzip,
            ..Self::default()
        }
    }

    /// Value for the `X-Cache` diagnostic header.
    pub fn x_cache(&self) -> String {
        match (self.miss, self.store) {
            (true, _) => "miss".to_owned(),
            (false, Some(store)) => format!("hit, {store}"),
            (false, None) => "hit".to_owned(),
        }
    }
}

/// Shared handle to a request's [`CacheContext`], stored in the request
/// extensions so the handler and the middleware see the same flags.
#[derive(Debug, Clone, Default)]
pub struct CacheSlot(Arc<Mutex<CacheContext>>);

impl CacheSlot {
    pub fn new(context: CacheContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    /// Copy of the current flags.
    pub fn get(&self) -> CacheContext {
        mutex_lock(&self.0, SOURCE, "get").clone()
    }

    pub fn set(&self, context: CacheContext) {
        *mutex_lock(&self.0, SOURCE, "set") = context;
    }
}
