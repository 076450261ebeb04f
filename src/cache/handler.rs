//! Lookup side of the cache: decides between a 304, a stored record, or
//! regenerating the response.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::compression;
use super::config::CacheOptions;
use super::context::{CacheContext, ServedFrom};
use super::error::CacheResult;
use super::etag;
use super::keys::CacheIdentity;
use super::record::CacheRecord;
use super::ResponseCache;
use crate::http::{Body, Response, StatusCode};

const UNVERSIONED: &str = "*";

enum Lookup {
    Serve(CacheRecord),
    Regenerate,
}

impl ResponseCache {
    /// Answers one cacheable request.
    ///
    /// `regenerate` produces the live response and is called at most once;
    /// its output is returned untouched. Store failures count as misses.
    ///
    /// # Errors
    ///
    /// A stored record that cannot be decoded or decompressed.
    pub async fn run<F, Fut>(
        &self,
        identity: &CacheIdentity,
        context: &mut CacheContext,
        options: &CacheOptions,
        if_none_match: Option<&str>,
        regenerate: F,
    ) -> CacheResult<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        let keys = identity.derive(&self.settings.key_namespace, self.settings.key_schema_version);

        context.cache = true;
        context.key = Some(keys.entity_tag.clone());
        context.unversioned_key = Some(keys.cache_key.clone());
        if options.versioned_cache_expiry.is_some() {
            context.versioned_cache_expiry = options.versioned_cache_expiry;
        }

        debug!(
            raw_key = %keys.entity_tag_source,
            key = %keys.entity_tag,
            if_none_match = if_none_match.unwrap_or(""),
            "Computed cache keys"
        );

        let lookup = if options.force_refill {
            debug!(key = %keys.entity_tag, "Forced cache refill");
            Lookup::Regenerate
        } else if etag::matches(Some(&keys.entity_tag), if_none_match) {
            context.miss = false;
            context.store = Some(ServedFrom::Client);
            debug!(cache = "client", outcome = "hit", key = %keys.entity_tag, "Cache hit");
            return Ok(Response::new(StatusCode::NotModified));
        } else {
            self.check_server(&keys.cache_key, &keys.entity_tag, context, options)?
        };

        match lookup {
            Lookup::Serve(record) => {
                context.miss = false;
                context.store = Some(ServedFrom::Server);
                serve(record, context.accepts_gzip)
            }
            Lookup::Regenerate => {
                if !context.locked {
                    self.lock.acquire(&keys.entity_tag);
                }
                context.locked = true;
                context.miss = true;
                info!(key = %keys.entity_tag, "Refilling cache");
                Ok(regenerate().await)
            }
        }
    }

    fn check_server(
        &self,
        cache_key: &str,
        entity_tag: &str,
        context: &mut CacheContext,
        options: &CacheOptions,
    ) -> CacheResult<Lookup> {
        let payload = match self.store.read(cache_key) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(cache = "server", outcome = "miss", key = %cache_key, "No stored record");
                return Ok(Lookup::Regenerate);
            }
            Err(err) => {
                warn!(key = %cache_key, error = %err, "Backing store read failed; treating as miss");
                return Ok(Lookup::Regenerate);
            }
        };
        let record = CacheRecord::decode(&payload)?;

        let match_tag = if options.serve_unversioned {
            UNVERSIONED
        } else {
            entity_tag
        };

        if match_tag == UNVERSIONED {
            debug!(cache = "server", outcome = "hit", mode = "unversioned", "Cache hit");
            return Ok(Lookup::Serve(record));
        }
        if record.etag() == Some(match_tag) {
            debug!(cache = "server", outcome = "hit", "Cache hit");
            return Ok(Lookup::Serve(record));
        }

        // Version mismatch: regenerate if nobody else is, otherwise lean on
        // the stale copy while it is young enough.
        if self.lock.acquire(match_tag) {
            context.locked = true;
            debug!(key = %match_tag, "Acquired regeneration lock for stale record");
            return Ok(Lookup::Regenerate);
        }
        if within_tolerance(record.created_at, options.cache_age_tolerance, self.clock.now()) {
            debug!(cache = "server", outcome = "stale", "Cache hit: server (recent)");
            return Ok(Lookup::Serve(record));
        }

        debug!(
            created_at = ?record.created_at,
            "Found an unversioned cache entry, but it was too old"
        );
        Ok(Lookup::Regenerate)
    }
}

fn within_tolerance(created_at: Option<i64>, tolerance: Duration, now: i64) -> bool {
    let Some(created_at) = created_at else {
        return false;
    };
    if tolerance.is_zero() {
        return false;
    }
    let tolerance = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    now.saturating_sub(created_at) <= tolerance
}

fn serve(record: CacheRecord, accepts_gzip: bool) -> CacheResult<Response> {
    let CacheRecord {
        status,
        mut headers,
        body,
        location,
        ..
    } = record;

    if let Some(location) = location {
        if !headers.contains("location") {
            headers.insert("Location", location);
        }
    }

    let body = if accepts_gzip {
        headers.set("Content-Encoding", "gzip");
        body
    } else {
        debug!("Uncompressing for client without gzip");
        compression::gunzip(&body)?
    };

    Ok(Response::from_parts(status, headers, Body::from(body)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::CacheSettings;
    use crate::cache::keys::KeyValue;
    use crate::cache::lock::RegenerationLock;
    use crate::cache::store::{BackingStore, StoreError};
    use crate::cache::CacheError;
    use crate::http::Headers;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct RecordingStore {
        record: Mutex<Option<Vec<u8>>>,
        reads: Mutex<Vec<String>>,
        fail: bool,
    }

    impl BackingStore for RecordingStore {
        fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.reads.lock().unwrap().push(key.to_owned());
            if self.fail {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            Ok(self.record.lock().unwrap().clone())
        }

        fn write(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct ScriptedLock {
        grant: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLock {
        fn new(grant: bool) -> Self {
            Self {
                grant,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl RegenerationLock for ScriptedLock {
        fn acquire(&self, key: &str) -> bool {
            self.calls.lock().unwrap().push(key.to_owned());
            self.grant
        }
    }

    struct Harness {
        cache: ResponseCache,
        store: Arc<RecordingStore>,
        lock: Arc<ScriptedLock>,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(store: RecordingStore, lock: ScriptedLock) -> Self {
            let store = Arc::new(store);
            let lock = Arc::new(lock);
            let cache = ResponseCache::new(CacheSettings::default(), store.clone(), lock.clone())
                .with_clock(Arc::new(ManualClock::new(NOW)));
            Self {
                cache,
                store,
                lock,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn keys(&self) -> (String, String) {
            let keys = identity().derive("cacheable", 1);
            (keys.entity_tag, keys.cache_key)
        }

        async fn run(
            &self,
            context: &mut CacheContext,
            options: CacheOptions,
            if_none_match: Option<&str>,
        ) -> CacheResult<Response> {
            let calls = self.calls.clone();
            self.cache
                .run(&identity(), context, &options, if_none_match, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Response::new(StatusCode::Ok).body("fresh")
                })
                .await
        }

        fn regenerations(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn identity() -> CacheIdentity {
        CacheIdentity::new(
            KeyValue::map([("path", "/products")]),
            KeyValue::map([("catalog", 3)]),
        )
    }

    fn record(etag: &str, created_at: Option<i64>) -> Vec<u8> {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("ETag", etag);
        CacheRecord {
            status: StatusCode::Ok,
            headers,
            body: compression::gzip(b"cached").unwrap(),
            created_at,
            location: None,
        }
        .encode()
    }

    fn store_with(payload: Vec<u8>) -> RecordingStore {
        RecordingStore {
            record: Mutex::new(Some(payload)),
            ..RecordingStore::default()
        }
    }

    fn body_of(response: Response) -> Vec<u8> {
        response.into_parts().2.into_bytes().to_vec()
    }

    #[tokio::test]
    async fn client_hit_returns_not_modified() {
        let harness = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, cache_key) = harness.keys();
        let mut context = CacheContext::new(true);

        let response = harness
            .run(&mut context, CacheOptions::default(), Some(&etag))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NotModified);
        assert!(response.headers().get("content-type").is_none());
        assert!(context.cache);
        assert!(!context.miss);
        assert_eq!(context.store, Some(ServedFrom::Client));
        assert_eq!(context.key.as_deref(), Some(etag.as_str()));
        assert_eq!(context.unversioned_key.as_deref(), Some(cache_key.as_str()));
        assert_eq!(harness.regenerations(), 0);
        assert!(harness.store.reads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cold_cache_regenerates_once() {
        let harness = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, cache_key) = harness.keys();
        let mut context = CacheContext::new(true);

        let response = harness
            .run(&mut context, CacheOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(body_of(response), b"fresh");
        assert_eq!(harness.regenerations(), 1);
        assert!(context.miss);
        assert!(context.locked);
        assert_eq!(context.store, None);
        assert_eq!(*harness.store.reads.lock().unwrap(), vec![cache_key]);
        assert_eq!(*harness.lock.calls.lock().unwrap(), vec![etag]);
    }

    #[tokio::test]
    async fn exact_server_hit_serves_compressed_record() {
        let probe = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, _) = probe.keys();
        let harness = Harness::new(store_with(record(&etag, Some(NOW - 5))), ScriptedLock::new(true));
        let mut context = CacheContext::new(true);

        let response = harness
            .run(&mut context, CacheOptions::default(), Some("\"something-else\""))
            .await
            .unwrap();

        assert_eq!(harness.regenerations(), 0);
        assert_eq!(context.store, Some(ServedFrom::Server));
        assert!(!context.miss);
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-encoding"), Some("gzip"));
        assert_eq!(response.headers().get("etag"), Some(etag.as_str()));
        assert_eq!(compression::gunzip(&body_of(response)).unwrap(), b"cached");
        assert!(harness.lock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_hit_is_decompressed_without_gzip() {
        let probe = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, _) = probe.keys();
        let harness = Harness::new(store_with(record(&etag, Some(NOW))), ScriptedLock::new(true));
        let mut context = CacheContext::new(false);

        let response = harness
            .run(&mut context, CacheOptions::default(), None)
            .await
            .unwrap();

        assert!(response.headers().get("content-encoding").is_none());
        assert_eq!(body_of(response), b"cached");
    }

    #[tokio::test]
    async fn stale_record_with_lock_regenerates() {
        let harness = Harness::new(
            store_with(record("cacheable:old", Some(NOW))),
            ScriptedLock::new(true),
        );
        let (etag, _) = harness.keys();
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().cache_age_tolerance(Duration::from_secs(999_999_999));

        let response = harness.run(&mut context, options, None).await.unwrap();

        assert_eq!(body_of(response), b"fresh");
        assert_eq!(harness.regenerations(), 1);
        assert!(context.locked);
        assert!(context.miss);
        // The claim taken for the stale record is reused by the refill.
        assert_eq!(*harness.lock.calls.lock().unwrap(), vec![etag]);
    }

    #[tokio::test]
    async fn stale_record_within_tolerance_is_served() {
        let harness = Harness::new(
            store_with(record("cacheable:old", Some(NOW - 60))),
            ScriptedLock::new(false),
        );
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().cache_age_tolerance(Duration::from_secs(999_999_999));

        let response = harness.run(&mut context, options, None).await.unwrap();

        assert_eq!(harness.regenerations(), 0);
        assert_eq!(context.store, Some(ServedFrom::Server));
        assert!(!context.locked);
        assert_eq!(compression::gunzip(&body_of(response)).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn stale_record_too_old_regenerates() {
        let harness = Harness::new(
            store_with(record("cacheable:old", Some(NOW - 600))),
            ScriptedLock::new(false),
        );
        let (etag, _) = harness.keys();
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().cache_age_tolerance(Duration::from_secs(60));

        harness.run(&mut context, options, None).await.unwrap();

        assert_eq!(harness.regenerations(), 1);
        assert!(context.miss);
        assert!(context.locked);
        // Refused once for the stale record, tried again for the refill.
        assert_eq!(*harness.lock.calls.lock().unwrap(), vec![etag.clone(), etag]);
    }

    #[tokio::test]
    async fn stale_record_without_timestamp_regenerates() {
        let harness = Harness::new(store_with(record("cacheable:old", None)), ScriptedLock::new(false));
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().cache_age_tolerance(Duration::from_secs(999_999_999));

        harness.run(&mut context, options, None).await.unwrap();
        assert_eq!(harness.regenerations(), 1);
    }

    #[tokio::test]
    async fn zero_tolerance_never_serves_stale() {
        let harness = Harness::new(
            store_with(record("cacheable:old", Some(NOW))),
            ScriptedLock::new(false),
        );
        let mut context = CacheContext::new(true);

        harness
            .run(&mut context, CacheOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(harness.regenerations(), 1);
    }

    #[tokio::test]
    async fn unversioned_mode_serves_any_record() {
        let harness = Harness::new(
            store_with(record("cacheable:old", None)),
            ScriptedLock::new(true),
        );
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().serve_unversioned(true);

        harness.run(&mut context, options, None).await.unwrap();

        assert_eq!(harness.regenerations(), 0);
        assert_eq!(context.store, Some(ServedFrom::Server));
        assert!(harness.lock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_refill_skips_lookups() {
        let harness = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, _) = harness.keys();
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().force_refill(true);

        harness.run(&mut context, options, Some(&etag)).await.unwrap();

        assert_eq!(harness.regenerations(), 1);
        assert!(context.miss);
        assert!(harness.store.reads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_degrades_to_miss() {
        let store = RecordingStore {
            fail: true,
            ..RecordingStore::default()
        };
        let harness = Harness::new(store, ScriptedLock::new(true));
        let mut context = CacheContext::new(true);

        let response = harness
            .run(&mut context, CacheOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(body_of(response), b"fresh");
        assert!(context.miss);
    }

    #[tokio::test]
    async fn corrupt_body_is_a_hard_error() {
        let probe = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let (etag, _) = probe.keys();
        let mut headers = Headers::new();
        headers.insert("ETag", etag);
        let payload = CacheRecord {
            status: StatusCode::Ok,
            headers,
            body: b"not gzip".to_vec(),
            created_at: Some(NOW),
            location: None,
        }
        .encode();
        let harness = Harness::new(store_with(payload), ScriptedLock::new(true));
        let mut context = CacheContext::new(false);

        let err = harness
            .run(&mut context, CacheOptions::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Decompression { .. }));
        assert_eq!(harness.regenerations(), 0);
    }

    #[tokio::test]
    async fn expiry_override_lands_in_context() {
        let harness = Harness::new(RecordingStore::default(), ScriptedLock::new(true));
        let mut context = CacheContext::new(true);
        let options = CacheOptions::default().versioned_cache_expiry(Duration::from_secs(300));

        harness.run(&mut context, options, None).await.unwrap();
        assert_eq!(context.versioned_cache_expiry, Some(Duration::from_secs(300)));
    }

    #[test]
    fn tolerance_window() {
        let tolerance = Duration::from_secs(60);
        assert!(within_tolerance(Some(NOW - 60), tolerance, NOW));
        assert!(!within_tolerance(Some(NOW - 61), tolerance, NOW));
        assert!(!within_tolerance(None, tolerance, NOW));
        assert!(!within_tolerance(Some(NOW), Duration::ZERO, NOW));
    }
}
