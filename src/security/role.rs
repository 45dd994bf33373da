use tracing::debug;

use crate::{
    Response, StatusCode,
    attributes::{AttributeMiddleware, Attributes},
    context::Context,
    error::Result,
    handler::BoxFuture,
    middleware::{Middleware, Next},
};

const DEFAULT_HEADER: &str = "X-Role";

/// The role a [`RoleGuard`] let through, stored in the request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedRole(pub String);

/// Lets a request through only when a header carries the required role.
///
/// The header holds a comma-separated role list (`X-Role: editor, admin`).
/// Requests without the role get `403 Forbidden` and never reach the rest of
/// the chain. Requests with it continue with a [`GrantedRole`] extension.
///
/// Verifying who set the header is someone else's job; this guard only
/// compares strings, which is what makes it a convenient attribute example.
///
/// # Attributes
///
/// | Key      | Kind   | Required | Default  |
/// |----------|--------|----------|----------|
/// | `role`   | string | yes      |          |
/// | `header` | string | no       | `X-Role` |
///
/// # Examples
///
/// ```rust
/// use onionskin::{Attributes, Context, Pipeline, Response, StatusCode, handler_fn};
/// use onionskin::security::RoleGuard;
///
/// let admin_only = Pipeline::builder()
///     .layer_with(RoleGuard::default(), Attributes::new().with("role", "admin"))
///     .build(handler_fn(|_ctx: Context| async { Ok(Response::new(StatusCode::Ok)) }))
///     .unwrap();
/// assert_eq!(admin_only.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RoleGuard {
    role: String,
    header: String,
}

impl Default for RoleGuard {
    fn default() -> Self {
        Self {
            role: String::new(),
            header: DEFAULT_HEADER.to_owned(),
        }
    }
}

impl RoleGuard {
    /// A guard requiring `role` in the default `X-Role` header.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    fn permits(&self, ctx: &Context) -> bool {
        ctx.request()
            .headers()
            .get_all(&self.header)
            .flat_map(|value| value.split(','))
            .any(|role| role.trim() == self.role)
    }
}

impl Middleware<Context, Response> for RoleGuard {
    fn handle<'a>(
        &'a self,
        mut ctx: Context,
        next: Next<'a, Context, Response>,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            if !self.permits(&ctx) {
                debug!(role = %self.role, path = %ctx.request().path(), "role check failed");
                return Ok(Response::new(StatusCode::Forbidden).body("Forbidden"));
            }
            ctx.extensions_mut().insert(GrantedRole(self.role.clone()));
            next.run(ctx).await
        })
    }

    fn name(&self) -> &str {
        "role"
    }
}

impl AttributeMiddleware<Context, Response> for RoleGuard {
    fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
        self.role = attributes.str("role")?.to_owned();
        self.header = attributes.str_or("header", DEFAULT_HEADER)?.to_owned();
        Ok(())
    }
}
