//! The request-handler contract shared by terminal handlers and composed chains.
//!
//! A [`RequestHandler`] turns one request into one response (or one error).
//! The terminal handler at the centre of a pipeline implements it, and so does
//! every composed [`Pipeline`](crate::pipeline::Pipeline), which is what lets a
//! pipeline be nested inside another one or served directly.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::error::Result;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` lets handlers of different concrete types be stored side by
/// side; `Send` lets the runtime move an in-flight request between worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased, reference-counted handler.
pub type BoxedHandler<Req, Res> = Arc<dyn RequestHandler<Req, Res>>;

/// Given a request, produce a response.
///
/// # Contract
///
/// - Every call resolves to exactly one `Ok(response)` or one `Err(error)`.
/// - Failures are returned, never swallowed; the caller decides what to do with them.
/// - Implementations are shared across concurrent requests, so any per-request
///   mutable state belongs in the request value, not in `self`.
///
/// # Examples
///
/// ```rust
/// use onionskin::{BoxFuture, RequestHandler, Result};
///
/// struct Echo;
///
/// impl RequestHandler<String, String> for Echo {
///     fn handle(&self, request: String) -> BoxFuture<'_, Result<String>> {
///         Box::pin(async move { Ok(request) })
///     }
/// }
/// ```
pub trait RequestHandler<Req, Res>: Send + Sync {
    /// Handle `request` and resolve to its response.
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>>;
}

impl<Req, Res, H> RequestHandler<Req, Res> for Arc<H>
where
    H: RequestHandler<Req, Res> + ?Sized,
{
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>> {
        (**self).handle(request)
    }
}

impl<Req, Res, H> RequestHandler<Req, Res> for Box<H>
where
    H: RequestHandler<Req, Res> + ?Sized,
{
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>> {
        (**self).handle(request)
    }
}

/// Adapter returned by [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F>(F);

/// Wraps an async function or closure as a [`RequestHandler`].
///
/// # Examples
///
/// ```rust
/// use onionskin::{RequestHandler, handler_fn};
///
/// # async fn demo() -> onionskin::Result<()> {
/// let upper = handler_fn(|req: String| async move { Ok(req.to_uppercase()) });
/// assert_eq!(upper.handle("hi".to_owned()).await?, "HI");
/// # Ok(())
/// # }
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

impl<F, Fut, Req, Res> RequestHandler<Req, Res> for FnHandler<F>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Res>> + Send + 'static,
{
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>> {
        Box::pin((self.0)(request))
    }
}
