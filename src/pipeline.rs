//! Pipeline composition: turns an ordered middleware list into one handler.
//!
//! Given `[m0, m1, …, mN-1]` and a terminal handler `T`, [`build`] performs a
//! right fold: starting from `T`, each middleware (last first) is wrapped
//! around the current head in a `Link` that owns a reference to the rest of
//! the chain. The final head behaves like
//!
//! ```text
//! m0.handle(req, next = m1.handle(_, next = … mN-1.handle(_, next = T)))
//! ```
//!
//! which gives onion ordering: `m0` runs its "before" logic first and its
//! "after" logic last, `mN-1` sits right next to `T`.
//!
//! The chain is a singly linked list of `Arc`s built once and never mutated, so
//! a [`Pipeline`] can be cloned cheaply and invoked from any number of tasks at
//! the same time. Each invocation is an independent traversal.

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    attributes::{AttributeMiddleware, Attributes},
    config::PipelineConfig,
    error::{Error, Result},
    handler::{BoxFuture, BoxedHandler, RequestHandler},
    middleware::{BoxedMiddleware, Middleware, Next},
    registry::{Binding, MiddlewareRegistry},
};

// One frame of the chain: a middleware plus an owned handle to everything downstream.
struct Link<Req, Res> {
    middleware: BoxedMiddleware<Req, Res>,
    next: BoxedHandler<Req, Res>,
}

impl<Req, Res> RequestHandler<Req, Res> for Link<Req, Res> {
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>> {
        self.middleware.handle(request, Next::new(&*self.next))
    }
}

/// A composed middleware chain around a terminal handler.
///
/// `Pipeline` is itself a [`RequestHandler`], so it can be served directly or
/// used as the terminal handler of another pipeline.
pub struct Pipeline<Req, Res> {
    head: BoxedHandler<Req, Res>,
    names: Arc<[String]>,
}

impl<Req, Res> Clone for Pipeline<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            head: Arc::clone(&self.head),
            names: Arc::clone(&self.names),
        }
    }
}

impl<Req, Res> fmt::Debug for Pipeline<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.names)
            .finish_non_exhaustive()
    }
}

impl<Req: 'static, Res: 'static> Pipeline<Req, Res> {
    /// Starts a [`PipelineBuilder`].
    pub fn builder() -> PipelineBuilder<Req, Res> {
        PipelineBuilder::new()
    }
}

impl<Req, Res> Pipeline<Req, Res> {
    /// Number of middleware layers wrapped around the terminal handler.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// `true` when the pipeline is just the terminal handler.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Layer names from outermost to innermost.
    pub fn layer_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}

impl<Req, Res> RequestHandler<Req, Res> for Pipeline<Req, Res> {
    fn handle(&self, request: Req) -> BoxFuture<'_, Result<Res>> {
        self.head.handle(request)
    }
}

/// Composes `middleware` around `terminal`, outermost first.
///
/// With an empty list the returned pipeline dispatches straight to `terminal`.
/// The same middleware `Arc` may appear more than once; each position gets its
/// own link and the instance is shared.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use onionskin::{BoxedHandler, RequestHandler, handler_fn, pipeline};
///
/// # async fn demo() -> onionskin::Result<()> {
/// let terminal: BoxedHandler<String, usize> =
///     Arc::new(handler_fn(|req: String| async move { Ok(req.len()) }));
/// let p = pipeline::build(Vec::new(), terminal);
/// assert!(p.is_empty());
/// assert_eq!(p.handle("four".to_owned()).await?, 4);
/// # Ok(())
/// # }
/// ```
pub fn build<Req, Res>(
    middleware: Vec<BoxedMiddleware<Req, Res>>,
    terminal: BoxedHandler<Req, Res>,
) -> Pipeline<Req, Res>
where
    Req: 'static,
    Res: 'static,
{
    let names: Arc<[String]> = middleware.iter().map(|m| m.name().to_owned()).collect();

    let head = middleware
        .into_iter()
        .rev()
        .fold(terminal, |next, middleware| -> BoxedHandler<Req, Res> {
            Arc::new(Link { middleware, next })
        });

    debug!(layers = names.len(), names = ?names, "middleware pipeline composed");

    Pipeline { head, names }
}

// A pending layer; named entries are resolved against the registry in `build`.
enum Entry<Req, Res> {
    Ready(BoxedMiddleware<Req, Res>),
    Named(Binding),
}

/// Incremental constructor for a [`Pipeline`].
///
/// Layers are added outermost first. Problems found while adding layers (an
/// attribute that fails validation, a malformed binding spec) are held back and
/// reported by [`build`](Self::build), as are unknown names and failing
/// factories, so a misconfigured pipeline never reaches the request path.
///
/// # Examples
///
/// ```rust
/// use onionskin::{Pipeline, handler_fn};
/// use onionskin::middleware::LoggerMiddleware;
/// use onionskin::security::CorsMiddleware;
/// use onionskin::{Context, Response, StatusCode};
///
/// let pipeline = Pipeline::builder()
///     .layer(LoggerMiddleware)
///     .layer(CorsMiddleware::new())
///     .build(handler_fn(|_ctx: Context| async { Ok(Response::new(StatusCode::Ok)) }))
///     .unwrap();
/// assert_eq!(pipeline.layer_names(), vec!["logger", "cors"]);
/// ```
pub struct PipelineBuilder<Req, Res> {
    entries: Vec<Entry<Req, Res>>,
    registry: Option<Arc<MiddlewareRegistry<Req, Res>>>,
    error: Option<Error>,
}

impl<Req: 'static, Res: 'static> Default for PipelineBuilder<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req: 'static, Res: 'static> PipelineBuilder<Req, Res> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            registry: None,
            error: None,
        }
    }

    /// Appends a middleware instance.
    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware<Req, Res> + 'static,
    {
        self.layer_arc(Arc::new(middleware))
    }

    /// Appends an already shared middleware instance.
    #[must_use]
    pub fn layer_arc(mut self, middleware: BoxedMiddleware<Req, Res>) -> Self {
        self.entries.push(Entry::Ready(middleware));
        self
    }

    /// Injects `attributes` into `middleware` and appends it.
    ///
    /// A rejected attribute map surfaces as the error of [`build`](Self::build).
    #[must_use]
    pub fn layer_with<M>(mut self, mut middleware: M, attributes: Attributes) -> Self
    where
        M: AttributeMiddleware<Req, Res> + 'static,
    {
        match middleware.set_attributes(attributes) {
            Ok(()) => self.entries.push(Entry::Ready(Arc::new(middleware))),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Registry used to resolve [`named`](Self::named) entries.
    #[must_use]
    pub fn registry(mut self, registry: Arc<MiddlewareRegistry<Req, Res>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a registry entry by binding spec, e.g. `"auth"` or `"role:role=admin"`.
    ///
    /// The factory runs when [`build`](Self::build) is called, not now.
    #[must_use]
    pub fn named(mut self, spec: &str) -> Self {
        match spec.parse::<Binding>() {
            Ok(binding) => self.entries.push(Entry::Named(binding)),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Appends every entry of `config`, in order, as named entries.
    #[must_use]
    pub fn config(mut self, config: &PipelineConfig) -> Self {
        match config.bindings() {
            Ok(bindings) => self.entries.extend(bindings.into_iter().map(Entry::Named)),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Resolves all entries and composes them around `terminal`.
    ///
    /// # Errors
    ///
    /// The first error recorded while adding layers, or any error raised while
    /// resolving named entries ([`Error::MissingRegistry`],
    /// [`Error::UnknownMiddleware`], [`Error::GroupCycle`], [`Error::Factory`], …).
    pub fn build<H>(self, terminal: H) -> Result<Pipeline<Req, Res>>
    where
        H: RequestHandler<Req, Res> + 'static,
    {
        self.build_boxed(Arc::new(terminal))
    }

    /// Like [`build`](Self::build) for a terminal handler that is already shared.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn build_boxed(self, terminal: BoxedHandler<Req, Res>) -> Result<Pipeline<Req, Res>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut layers = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            match entry {
                Entry::Ready(middleware) => layers.push(middleware),
                Entry::Named(binding) => {
                    let registry =
                        self.registry
                            .as_deref()
                            .ok_or_else(|| Error::MissingRegistry {
                                name: binding.name().to_owned(),
                            })?;
                    layers.extend(registry.resolve(&binding)?);
                }
            }
        }

        Ok(build(layers, terminal))
    }

    // Keeps the first failure; later ones are usually knock-on effects.
    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::handler::handler_fn;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Trace {
        label: &'static str,
        log: Log,
    }

    impl Middleware<String, String> for Trace {
        fn handle<'a>(
            &'a self,
            request: String,
            next: Next<'a, String, String>,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}-before", self.label));
                let response = next.run(request).await;
                self.log.lock().unwrap().push(format!("{}-after", self.label));
                response
            })
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    struct Count(Arc<AtomicUsize>);

    impl Middleware<String, String> for Count {
        fn handle<'a>(
            &'a self,
            request: String,
            next: Next<'a, String, String>,
        ) -> BoxFuture<'a, Result<String>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.run(request)
        }
    }

    struct Greeting {
        word: String,
    }

    impl Middleware<String, String> for Greeting {
        fn handle<'a>(
            &'a self,
            request: String,
            next: Next<'a, String, String>,
        ) -> BoxFuture<'a, Result<String>> {
            next.run(format!("{} {request}", self.word))
        }
    }

    impl AttributeMiddleware<String, String> for Greeting {
        fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
            self.word = attributes.str("word")?.to_owned();
            Ok(())
        }
    }

    fn echo() -> impl RequestHandler<String, String> + 'static {
        handler_fn(|req: String| async move { Ok(req) })
    }

    #[tokio::test]
    async fn empty_pipeline_is_terminal() {
        let p = Pipeline::builder().build(echo()).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.handle("x".into()).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn onion_ordering() {
        let log: Log = Arc::default();
        let terminal_log = Arc::clone(&log);
        let p = Pipeline::builder()
            .layer(Trace { label: "A", log: Arc::clone(&log) })
            .layer(Trace { label: "B", log: Arc::clone(&log) })
            .build(handler_fn(move |req: String| {
                let log = Arc::clone(&terminal_log);
                async move {
                    log.lock().unwrap().push("T".into());
                    Ok(req)
                }
            }))
            .unwrap();

        p.handle("r".into()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["A-before", "B-before", "T", "B-after", "A-after"]
        );
        assert_eq!(p.layer_names(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn shared_instance_runs_at_each_position() {
        let hits = Arc::new(AtomicUsize::new(0));
        let shared: BoxedMiddleware<String, String> = Arc::new(Count(Arc::clone(&hits)));
        let p = Pipeline::builder()
            .layer_arc(Arc::clone(&shared))
            .layer_arc(shared)
            .build(echo())
            .unwrap();

        p.handle("x".into()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(p.len(), 2);
    }

    #[tokio::test]
    async fn layer_with_injects_attributes() {
        let p = Pipeline::builder()
            .layer_with(
                Greeting { word: String::new() },
                Attributes::new().with("word", "hello"),
            )
            .build(echo())
            .unwrap();
        assert_eq!(p.handle("world".into()).await.unwrap(), "hello world");
    }

    #[test]
    fn bad_attributes_fail_at_build() {
        let result = Pipeline::builder()
            .layer_with(Greeting { word: String::new() }, Attributes::new())
            .build(echo());
        assert!(matches!(result, Err(Error::MissingAttribute { key }) if key == "word"));
    }

    #[test]
    fn named_without_registry_fails_at_build() {
        let result = Pipeline::<String, String>::builder()
            .named("auth")
            .build(echo());
        assert!(matches!(result, Err(Error::MissingRegistry { name }) if name == "auth"));
    }

    #[test]
    fn malformed_spec_fails_at_build() {
        let result = Pipeline::<String, String>::builder()
            .named("auth:role")
            .build(echo());
        assert!(matches!(result, Err(Error::InvalidSpec { .. })));
    }

    #[tokio::test]
    async fn nested_pipeline_as_terminal() {
        let inner = Pipeline::builder()
            .layer_with(
                Greeting { word: String::new() },
                Attributes::new().with("word", "inner"),
            )
            .build(echo())
            .unwrap();
        let outer = Pipeline::builder()
            .layer_with(
                Greeting { word: String::new() },
                Attributes::new().with("word", "outer"),
            )
            .build(inner)
            .unwrap();
        assert_eq!(outer.handle("x".into()).await.unwrap(), "inner outer x");
    }

    #[test]
    fn debug_lists_layers() {
        let p = build(
            vec![Arc::new(Count(Arc::default())) as BoxedMiddleware<String, String>],
            Arc::new(echo()),
        );
        assert!(format!("{p:?}").contains("Count"));
    }
}
