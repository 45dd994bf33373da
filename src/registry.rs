//! Named middleware registry with lazily-invoked factories.
//!
//! Routes usually refer to middleware by name (`"cors"`, `"role:role=admin"`)
//! rather than by instance. The registry maps each name to a factory that is
//! only called when a pipeline is built, once per occurrence, so expensive
//! construction is deferred until a route actually uses the middleware and
//! every occurrence gets its own instance with its own attributes.
//!
//! Groups give a name to an ordered list of bindings (`"web" → ["logger",
//! "cors"]`) and expand in place. Groups may contain other groups.
//!
//! ## Binding spec syntax
//!
//! | Spec                          | Name   | Attributes                      |
//! |-------------------------------|--------|---------------------------------|
//! | `cors`                        | `cors` | *(none)*                        |
//! | `role:role=admin`             | `role` | `role → "admin"`                |
//! | `cors:origins=a|b,max_age=60` | `cors` | `origins → [a, b]`, `max_age → 60` |

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use tracing::debug;

use crate::{
    attributes::{AttributeMiddleware, AttributeValue, Attributes},
    config::PipelineConfig,
    error::{BoxError, Error, Result},
    middleware::{BoxedMiddleware, Middleware},
};

/// A factory producing one configured middleware instance per call.
pub type Factory<Req, Res> =
    Arc<dyn Fn(Attributes) -> Result<BoxedMiddleware<Req, Res>> + Send + Sync>;

/// A middleware name together with the attributes bound to it at one use site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    name: String,
    attributes: Attributes,
}

impl Binding {
    /// Creates a binding, rejecting names the binding syntax could not express.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpec`] when `name` is empty or contains `:`, `,` or `=`.
    pub fn new(name: impl Into<String>, attributes: Attributes) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(invalid(&name, "empty middleware name"));
        }
        if name.contains([':', ',', '=']) {
            return Err(invalid(&name, "middleware name contains a reserved character"));
        }
        Ok(Self { name, attributes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl FromStr for Binding {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let Some((name, rest)) = spec.split_once(':') else {
            return Binding::new(spec, Attributes::new());
        };

        if rest.trim().is_empty() {
            return Err(invalid(spec, "missing attributes after `:`"));
        }

        let mut attributes = Attributes::new();
        for pair in rest.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(spec, "expected `key=value`"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid(spec, "empty attribute key"));
            }
            attributes.insert(key, AttributeValue::parse(value.trim()));
        }

        Binding::new(name.trim(), attributes)
    }
}

/// Renders the binding in spec form for logs and error messages.
///
/// The output is diagnostic only. Attribute values are printed without
/// quoting, so a string such as `"30"` reads back as an integer, and values
/// containing `,` or `|` do not parse back into the same binding.
impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (i, (key, value)) in self.attributes.iter().enumerate() {
            let sep = if i == 0 { ':' } else { ',' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

fn invalid(spec: &str, reason: &'static str) -> Error {
    Error::InvalidSpec {
        spec: spec.to_owned(),
        reason,
    }
}

/// Maps names to middleware factories and named groups.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use onionskin::{Context, MiddlewareRegistry, Pipeline, Response, StatusCode, handler_fn};
/// use onionskin::middleware::LoggerMiddleware;
/// use onionskin::security::{CorsMiddleware, RoleGuard};
///
/// let mut registry = MiddlewareRegistry::new();
/// registry.register("logger", || LoggerMiddleware);
/// registry.register_configurable("cors", CorsMiddleware::new);
/// registry.register_configurable("role", RoleGuard::default);
/// registry.group("web", ["logger", "cors"]).unwrap();
///
/// let pipeline = Pipeline::builder()
///     .registry(Arc::new(registry))
///     .named("web")
///     .named("role:role=admin")
///     .build(handler_fn(|_ctx: Context| async { Ok(Response::new(StatusCode::Ok)) }))
///     .unwrap();
/// assert_eq!(pipeline.layer_names(), vec!["logger", "cors", "role"]);
/// ```
pub struct MiddlewareRegistry<Req, Res> {
    factories: HashMap<String, Factory<Req, Res>>,
    groups: HashMap<String, Vec<Binding>>,
}

impl<Req: 'static, Res: 'static> Default for MiddlewareRegistry<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req: 'static, Res: 'static> MiddlewareRegistry<Req, Res> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    /// Registers a middleware that takes no attributes.
    ///
    /// Binding it with attributes fails with [`Error::AttributesNotSupported`].
    pub fn register<M, F>(&mut self, name: impl Into<String>, factory: F)
    where
        M: Middleware<Req, Res> + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let name = name.into();
        let owned = name.clone();
        self.insert(
            name,
            Arc::new(move |attributes: Attributes| -> Result<BoxedMiddleware<Req, Res>> {
                if !attributes.is_empty() {
                    return Err(Error::AttributesNotSupported { name: owned.clone() });
                }
                Ok(Arc::new(factory()))
            }),
        );
    }

    /// Registers a middleware whose instances receive the binding's attributes.
    ///
    /// `set_attributes` is called on every fresh instance, even when the binding
    /// carries no attributes, so required attributes are always validated.
    pub fn register_configurable<M, F>(&mut self, name: impl Into<String>, factory: F)
    where
        M: AttributeMiddleware<Req, Res> + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |attributes: Attributes| -> Result<BoxedMiddleware<Req, Res>> {
                let mut middleware = factory();
                middleware.set_attributes(attributes)?;
                Ok(Arc::new(middleware))
            }),
        );
    }

    /// Registers a fallible factory, e.g. one that acquires a connection.
    ///
    /// Errors returned by `factory` surface from pipeline construction as
    /// [`Error::Factory`].
    pub fn register_with<F, E>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Attributes) -> std::result::Result<BoxedMiddleware<Req, Res>, E>
            + Send
            + Sync
            + 'static,
        E: Into<BoxError>,
    {
        let name = name.into();
        let owned = name.clone();
        self.insert(
            name,
            Arc::new(move |attributes: Attributes| {
                factory(attributes).map_err(|source| Error::Factory {
                    name: owned.clone(),
                    source: source.into(),
                })
            }),
        );
    }

    /// Defines a named group of bindings, expanded in order wherever the group
    /// name is used.
    ///
    /// Members are resolved at build time, so a group may refer to names (or
    /// other groups) registered later.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpec`] when a member spec is malformed.
    pub fn group<I, S>(&mut self, name: impl Into<String>, members: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let members = members
            .into_iter()
            .map(|spec| spec.as_ref().parse::<Binding>())
            .collect::<Result<Vec<_>>>()?;
        debug!(group = %name, members = members.len(), "middleware group defined");
        self.groups.insert(name, members);
        Ok(())
    }

    /// Defines every group listed in `config`.
    ///
    /// # Errors
    ///
    /// See [`group`](Self::group).
    pub fn load_groups(&mut self, config: &PipelineConfig) -> Result<()> {
        for (name, members) in &config.groups {
            self.group(name.clone(), members)?;
        }
        Ok(())
    }

    /// `true` if `name` is a registered middleware or group.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name) || self.groups.contains_key(name)
    }

    /// Registered middleware and group names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .factories
            .keys()
            .chain(self.groups.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Instantiates the middleware for `binding`, expanding groups.
    ///
    /// A plain middleware name takes precedence over a group of the same name.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMiddleware`], [`Error::GroupCycle`], [`Error::InvalidSpec`]
    /// for a group bound with attributes, or whatever the factory returns.
    pub fn resolve(&self, binding: &Binding) -> Result<Vec<BoxedMiddleware<Req, Res>>> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        self.resolve_into(binding, &mut out, &mut stack)?;
        Ok(out)
    }

    fn resolve_into(
        &self,
        binding: &Binding,
        out: &mut Vec<BoxedMiddleware<Req, Res>>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let name = binding.name();

        if let Some(factory) = self.factories.get(name) {
            debug!(middleware = %binding, "instantiating middleware");
            out.push(factory(binding.attributes().clone())?);
            return Ok(());
        }

        let Some(members) = self.groups.get(name) else {
            return Err(Error::UnknownMiddleware {
                name: name.to_owned(),
            });
        };

        if !binding.attributes().is_empty() {
            return Err(invalid(&binding.to_string(), "groups take no attributes"));
        }
        if stack.iter().any(|entered| entered == name) {
            return Err(Error::GroupCycle {
                name: name.to_owned(),
            });
        }

        stack.push(name.to_owned());
        for member in members {
            self.resolve_into(member, out, stack)?;
        }
        stack.pop();
        Ok(())
    }

    fn insert(&mut self, name: String, factory: Factory<Req, Res>) {
        if self.factories.insert(name.clone(), factory).is_some() {
            debug!(middleware = %name, "replaced existing middleware registration");
        }
    }
}
