//! # cachet
//!
//! Versioned HTTP response caching: deterministic cache keys, `ETag`
//! negotiation, stale-while-revalidate serving and stampede protection,
//! packaged as middleware over a small HTTP/1.1 request/response model.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cachet::cache::{CacheIdentity, CacheSettings, ResponseCache, ResponseCacheMiddleware};
//! use cachet::context::Context;
//! use cachet::middleware::{BoxFuture, MiddlewareHandler, Next, from_middleware};
//! use cachet::{Request, Response, StatusCode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = Arc::new(ResponseCache::in_memory(CacheSettings::default()));
//!
//! let endpoint: MiddlewareHandler = {
//!     let cache = Arc::clone(&cache);
//!     Arc::new(move |ctx: Context, _next: Next| -> BoxFuture {
//!         let cache = Arc::clone(&cache);
//!         Box::pin(async move {
//!             let identity = CacheIdentity::for_request(ctx.request());
//!             cache
//!                 .respond(&ctx, &identity, cache.options(), || async {
//!                     Response::new(StatusCode::Ok).body("Hello, World!")
//!                 })
//!                 .await
//!                 .unwrap_or_else(|_| Response::new(StatusCode::InternalServerError))
//!         })
//!     })
//! };
//!
//! let chain = vec![
//!     from_middleware(Arc::new(ResponseCacheMiddleware::new(cache))),
//!     endpoint,
//! ];
//!
//! let (request, _) = Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
//! let response = Next::new(chain).run(Context::new(request)).await;
//! assert_eq!(response.headers().get("x-cache"), Some("miss"));
//! # }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod cache;
pub mod http;

// ── Request pipeline ──────────────────────────────────────────────────────────
pub mod context;
pub mod middleware;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, ResponseCache, ResponseCacheMiddleware};
pub use http::{Headers, Method, Request, Response, StatusCode};
