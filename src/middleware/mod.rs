//! Middleware contract — composable before/after request handler logic.
//!
//! A [`Middleware`] receives the request together with a [`Next`] handle for
//! "the rest of the chain downstream of this point". It may:
//!
//! - **Short-circuit** — return a response without calling `next`.
//! - **Transform the request** — call `next.run(changed)` and return its result.
//! - **Decorate the response** — call `next.run(request)`, then modify what comes back.
//!
//! Composition into a single handler lives in [`pipeline`](crate::pipeline).
//!
//! ## Built-in middleware
//!
//! - [`LoggerMiddleware`] — request/response logger for the HTTP types.

use std::sync::Arc;

use crate::{
    error::Result,
    handler::{BoxFuture, RequestHandler},
};

mod logger;

pub use logger::LoggerMiddleware;

/// A type-erased, reference-counted middleware instance.
///
/// The same `Arc` may appear at several positions of one pipeline, or in several
/// pipelines; each position gets its own link but shares the instance.
pub type BoxedMiddleware<Req, Res> = Arc<dyn Middleware<Req, Res>>;

/// Handle to the remainder of the chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware delegates at most
/// once per invocation. Dropping it without calling `run` short-circuits the
/// chain: nothing downstream executes.
pub struct Next<'a, Req, Res> {
    inner: &'a dyn RequestHandler<Req, Res>,
}

impl<'a, Req, Res> Next<'a, Req, Res> {
    /// Creates a `Next` that forwards to `inner`.
    ///
    /// Pipelines build these themselves; constructing one by hand is mostly
    /// useful for unit-testing a single middleware against a stub handler.
    pub fn new(inner: &'a dyn RequestHandler<Req, Res>) -> Self {
        Self { inner }
    }

    /// Forwards `request` to the rest of the chain and returns its outcome.
    pub fn run(self, request: Req) -> BoxFuture<'a, Result<Res>> {
        self.inner.handle(request)
    }
}

/// The core trait for all middleware.
///
/// # Contract
///
/// - Implementations are `Send + Sync`: one instance serves every concurrent
///   traversal of the pipelines it is part of.
/// - Per-request mutable state goes into the request value, never into `self`.
/// - Errors from `next` should be returned unchanged unless the middleware
///   deliberately converts them into a response.
///
/// # Examples
///
/// ```rust
/// use onionskin::{BoxFuture, Middleware, Next, Result};
///
/// struct Exclaim;
///
/// impl Middleware<String, String> for Exclaim {
///     fn handle<'a>(
///         &'a self,
///         request: String,
///         next: Next<'a, String, String>,
///     ) -> BoxFuture<'a, Result<String>> {
///         Box::pin(async move {
///             let response = next.run(request).await?;
///             Ok(format!("{response}!"))
///         })
///     }
/// }
/// ```
pub trait Middleware<Req, Res>: Send + Sync {
    /// Handle the request and optionally delegate to `next`.
    fn handle<'a>(&'a self, request: Req, next: Next<'a, Req, Res>)
    -> BoxFuture<'a, Result<Res>>;

    /// Name reported in logs and by [`Pipeline::layer_names`](crate::Pipeline::layer_names).
    ///
    /// Defaults to the Rust type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
