//! Crate-wide error type.
//!
//! Pipeline failures travel back up the chain as [`Error`] values. The pipeline
//! itself never catches them; a middleware that wants to turn a failure into a
//! response matches on the `Err` returned by [`Next::run`](crate::middleware::Next::run).

use thiserror::Error;

/// A boxed, thread-safe error raised by application code inside a handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while composing or running a middleware pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A handler or middleware failed while processing a request.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("unknown middleware `{name}`")]
    UnknownMiddleware { name: String },

    #[error("middleware `{name}` does not accept attributes")]
    AttributesNotSupported { name: String },

    #[error("missing required attribute `{key}`")]
    MissingAttribute { key: String },

    #[error("attribute `{key}` must be {expected}, found {found}")]
    AttributeType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid middleware spec `{spec}`: {reason}")]
    InvalidSpec { spec: String, reason: &'static str },

    #[error("middleware group `{name}` contains itself")]
    GroupCycle { name: String },

    #[error("failed to construct middleware `{name}`: {source}")]
    Factory {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("named middleware `{name}` used without a registry")]
    MissingRegistry { name: String },

    #[error("invalid pipeline config: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an application error raised inside a handler or middleware.
    ///
    /// # Examples
    ///
    /// ```
    /// use onionskin::Error;
    ///
    /// let err = Error::handler("database unavailable");
    /// assert_eq!(err.to_string(), "handler failed: database unavailable");
    /// ```
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }
}
