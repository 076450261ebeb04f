//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, so it can inspect the request,
//! short-circuit with its own response, or decorate the response coming
//! back up the chain. The response cache is one such layer
//! ([`ResponseCacheMiddleware`](crate::cache::ResponseCacheMiddleware)); the
//! application handler is simply the last entry in the stack.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`]
//!   to advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Response, StatusCode, context::Context};

/// Boxed future returned by every middleware.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
///
/// # Examples
///
/// ```rust
/// use cachet::{Response, context::Context, middleware::{BoxFuture, Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> BoxFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Construct one with [`from_middleware`] or by wrapping a closure directly:
///
/// ```rust
/// use std::sync::Arc;
/// use cachet::{Response, StatusCode, context::Context};
/// use cachet::middleware::{BoxFuture, MiddlewareHandler, Next};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, _next: Next| -> BoxFuture {
///     let path = ctx.request().path().to_owned();
///     Box::pin(async move { Response::new(StatusCode::Ok).body(path) })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// When the chain is exhausted without any layer producing a response, a
    /// `500 Internal Server Error` is returned instead.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response.
///
/// Implementations must be `Send + Sync` and return a `Send` future, and
/// must not hold a lock guard across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture;
}
