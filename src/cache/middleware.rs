//! Framework glue: the middleware layer and the handler-side entry point.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error};

use super::capture::RequestHints;
use super::config::CacheOptions;
use super::context::{CacheContext, CacheSlot};
use super::error::CacheResult;
use super::keys::CacheIdentity;
use super::ResponseCache;
use crate::context::Context;
use crate::http::{Request, Response, StatusCode};
use crate::middleware::{BoxFuture, Middleware, Next};

const NO_STORE: &str = "no-cache, no-store";

/// Installs a [`CacheSlot`] for each request and runs the capture pipeline
/// on the way back out.
///
/// Handlers below this layer opt in by calling [`ResponseCache::respond`];
/// responses from handlers that do not are passed through unchanged.
pub struct ResponseCacheMiddleware {
    cache: Arc<ResponseCache>,
}

impl ResponseCacheMiddleware {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

impl Middleware for ResponseCacheMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> BoxFuture {
        let cache = Arc::clone(&self.cache);
        Box::pin(async move {
            let accepts_gzip = ctx.request().accepts_encoding("gzip");
            let hints = RequestHints::from_request(ctx.request());

            let slot = CacheSlot::new(CacheContext::new(accepts_gzip));
            ctx.extensions_mut().insert(slot.clone());

            let response = next.run(ctx).await;

            match cache.capture(&slot.get(), hints, response) {
                Ok(response) => response,
                Err(err) => {
                    error!(error = %err, "Failed to capture response");
                    Response::new(StatusCode::InternalServerError)
                }
            }
        })
    }
}

/// Only `GET` and `HEAD` participate, and `cache=false` opts out.
pub fn is_cacheable_request(request: &Request) -> bool {
    request.method().is_cacheable() && request.query_param("cache") != Some("false")
}

impl ResponseCache {
    /// Default per-request options from the configured settings.
    pub fn options(&self) -> CacheOptions {
        CacheOptions::from_settings(&self.settings)
    }

    /// Handler-side entry point.
    ///
    /// Ineligible requests (cache disabled, non-`GET`/`HEAD`, `cache=false`)
    /// call `regenerate` directly and get `Cache-Control: no-cache, no-store`.
    /// Everything else goes through [`run`](Self::run) with the request's
    /// `If-None-Match` and the `fill_cache` override applied. The resulting
    /// flags land in the request's [`CacheSlot`] for the middleware to read.
    pub async fn respond<F, Fut>(
        &self,
        ctx: &Context,
        identity: &CacheIdentity,
        options: CacheOptions,
        regenerate: F,
    ) -> CacheResult<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        let request = ctx.request();

        if !self.settings.enabled || !is_cacheable_request(request) {
            debug!(
                enabled = self.settings.enabled,
                method = %request.method(),
                params_cache = request.query_param("cache").unwrap_or(""),
                "Uncacheable request"
            );
            let mut response = regenerate().await;
            response.headers_mut().set("Cache-Control", NO_STORE);
            return Ok(response);
        }

        let options = options.for_request(request);
        let slot = match ctx.extensions().get::<CacheSlot>() {
            Some(slot) => slot.clone(),
            None => {
                debug!("No cache slot on request; response will not be stored");
                CacheSlot::new(CacheContext::new(request.accepts_encoding("gzip")))
            }
        };

        let mut context = slot.get();
        let result = self
            .run(identity, &mut context, &options, request.if_none_match(), regenerate)
            .await;
        slot.set(context);
        result
    }
}
