//! # onionskin
//!
//! Composable async middleware pipelines with onion ordering.
//!
//! An ordered list of [`Middleware`] is folded around a terminal
//! [`RequestHandler`] into a single [`Pipeline`]. The first middleware is the
//! outermost layer: its "before" logic runs first and its "after" logic runs
//! last. Any layer may short-circuit, rewrite the request, or decorate the
//! response. Middleware that need per-route configuration implement
//! [`AttributeMiddleware`] and receive typed [`Attributes`] before the
//! pipeline is built.
//!
//! ## Quick Start
//!
//! ```rust
//! use onionskin::{BoxFuture, Middleware, Next, Pipeline, RequestHandler, Result, handler_fn};
//!
//! struct Shout;
//!
//! impl Middleware<String, String> for Shout {
//!     fn handle<'a>(
//!         &'a self,
//!         request: String,
//!         next: Next<'a, String, String>,
//!     ) -> BoxFuture<'a, Result<String>> {
//!         Box::pin(async move { Ok(next.run(request).await?.to_uppercase()) })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let pipeline = Pipeline::builder()
//!     .layer(Shout)
//!     .build(handler_fn(|name: String| async move { Ok(format!("hello, {name}")) }))?;
//!
//! assert_eq!(pipeline.handle("ferris".to_owned()).await?, "HELLO, FERRIS");
//! # Ok(())
//! # }
//! ```
//!
//! Named middleware, groups, and JSON configuration are covered in
//! [`registry`] and [`config`]; [`server`] hosts an HTTP pipeline over TCP.

// ── Pipeline core ─────────────────────────────────────────────────────────────
pub mod attributes;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod pipeline;

// ── Composition from names and configuration ─────────────────────────────────
pub mod config;
pub mod registry;

// ── HTTP hosting ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use attributes::{AttributeMiddleware, AttributeValue, Attributes};
pub use config::{MiddlewareEntry, PipelineConfig};
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use handler::{BoxFuture, BoxedHandler, RequestHandler, handler_fn};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{BoxedMiddleware, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::{Binding, MiddlewareRegistry};
pub use server::{Server, ServerError};
