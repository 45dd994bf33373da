use crate::{
    Method, Response, StatusCode,
    attributes::{AttributeMiddleware, Attributes},
    context::Context,
    error::Result,
    handler::BoxFuture,
    middleware::{Middleware, Next},
};

/// CORS middleware: validates the `Origin` header, answers preflight requests,
/// and adds `Access-Control-*` headers to actual responses.
///
/// # Behavior
///
/// - No `Origin` header, or an origin outside the allow-list: the request passes
///   through untouched.
/// - `OPTIONS` preflight from an allowed origin: short-circuits with
///   `204 No Content`; nothing downstream runs.
/// - Any other request from an allowed origin: runs the chain, then appends the
///   CORS headers to its response. A downstream error is returned as is.
/// - `Vary: Origin` is added whenever a specific origin (not `*`) is echoed.
///
/// # Attributes
///
/// | Key       | Kind            | Default                      |
/// |-----------|-----------------|------------------------------|
/// | `origins` | list of strings | `*`                          |
/// | `methods` | list of strings | `GET`, `POST`, `PUT`, `DELETE` |
/// | `headers` | list of strings | `Content-Type`, `Authorization` |
/// | `max_age` | integer         | `3600`                       |
///
/// # Examples
///
/// ```rust
/// use onionskin::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new()
///     .allow_origin("https://example.com")
///     .allow_method("PATCH")
///     .allow_header("X-Custom-Header");
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age: i64,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Permissive defaults: any origin, common methods, common headers.
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE"].map(str::to_owned).to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(str::to_owned).to_vec(),
            max_age: 3600,
        }
    }

    /// Adds an allowed origin.
    ///
    /// The first specific origin replaces the default wildcard; pass `"*"` to
    /// allow every origin again.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if origin != "*" {
            self.allowed_origins.retain(|o| o != "*");
        }
        self.allowed_origins.push(origin);
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    // The `Access-Control-Allow-Origin` value for `origin`, if it is allowed.
    fn allowed(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn decorate(&self, response: &mut Response, allow_origin: &str) {
        response.add_header("Access-Control-Allow-Origin", allow_origin);
        response.add_header("Access-Control-Allow-Methods", self.allowed_methods.join(", "));
        response.add_header("Access-Control-Allow-Headers", self.allowed_headers.join(", "));
        if allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
    }
}

impl Middleware<Context, Response> for CorsMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: Context,
        next: Next<'a, Context, Response>,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let allow_origin = ctx
                .request()
                .headers()
                .get("origin")
                .and_then(|origin| self.allowed(origin));
            let Some(allow_origin) = allow_origin else {
                return next.run(ctx).await;
            };

            if ctx.request().method() == &Method::Options {
                let mut response = Response::new(StatusCode::NoContent);
                self.decorate(&mut response, &allow_origin);
                response.add_header("Access-Control-Max-Age", self.max_age.to_string());
                return Ok(response);
            }

            let mut response = next.run(ctx).await?;
            self.decorate(&mut response, &allow_origin);
            Ok(response)
        })
    }

    fn name(&self) -> &str {
        "cors"
    }
}

impl AttributeMiddleware<Context, Response> for CorsMiddleware {
    fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
        if attributes.contains("origins") {
            self.allowed_origins = attributes.list("origins")?;
        }
        if attributes.contains("methods") {
            self.allowed_methods = attributes.list("methods")?;
        }
        if attributes.contains("headers") {
            self.allowed_headers = attributes.list("headers")?;
        }
        self.max_age = attributes.int_or("max_age", self.max_age)?;
        Ok(())
    }
}
