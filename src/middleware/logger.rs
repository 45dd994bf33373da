use tokio::time::Instant;
use tracing::{info, warn};

use super::{Middleware, Next};
use crate::{Response, context::Context, error::Result, handler::BoxFuture};

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` event after the downstream chain completes,
/// with `method`, `path`, `status` and `elapsed` fields.
///
/// When the downstream chain fails, a `warn!` record is emitted instead and the
/// error is returned untouched. `LoggerMiddleware` never short-circuits.
///
/// # Examples
///
/// ```rust
/// use onionskin::{Context, Pipeline, Response, StatusCode, handler_fn};
/// use onionskin::middleware::LoggerMiddleware;
///
/// let pipeline = Pipeline::builder()
///     .layer(LoggerMiddleware)
///     .build(handler_fn(|_ctx: Context| async { Ok(Response::new(StatusCode::Ok)) }))
///     .unwrap();
/// assert_eq!(pipeline.layer_names(), vec!["logger"]);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerMiddleware;

impl Middleware<Context, Response> for LoggerMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: Context,
        next: Next<'a, Context, Response>,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();

            match next.run(ctx).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    info!(%method, %path, status, elapsed = ?start.elapsed(), "request completed");
                    Ok(response)
                }
                Err(err) => {
                    warn!(%method, %path, error = %err, elapsed = ?start.elapsed(), "request failed");
                    Err(err)
                }
            }
        })
    }

    fn name(&self) -> &str {
        "logger"
    }
}
