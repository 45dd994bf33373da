//! Security middleware for the HTTP pipeline.
//!
//! - [`CorsMiddleware`] — Cross-Origin Resource Sharing headers; short-circuits
//!   `OPTIONS` preflights.
//! - [`RoleGuard`] — attribute-driven gate that answers `403 Forbidden` unless
//!   the request carries the configured role.
//!
//! Both implement [`AttributeMiddleware`](crate::AttributeMiddleware), so they
//! can be bound by name from a [`MiddlewareRegistry`](crate::MiddlewareRegistry)
//! with per-route attributes.

mod cors;
mod role;

pub use cors::CorsMiddleware;
pub use role::{GrantedRole, RoleGuard};
