//! End-to-end behaviour of composed pipelines.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use onionskin::{
    AttributeMiddleware, Attributes, BoxFuture, BoxedHandler, BoxedMiddleware, Context, Error,
    Method, Middleware, MiddlewareRegistry, Next, Pipeline, PipelineConfig, Request,
    RequestHandler, Response, Result, StatusCode, handler_fn, pipeline,
    security::{GrantedRole, RoleGuard},
};

type Log = Arc<Mutex<Vec<String>>>;

fn echo() -> BoxedHandler<String, String> {
    Arc::new(handler_fn(|req: String| async move { Ok(format!("echo:{req}")) }))
}

struct PassThrough;

impl Middleware<String, String> for PassThrough {
    fn handle<'a>(
        &'a self,
        request: String,
        next: Next<'a, String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        next.run(request)
    }
}

struct Halt(&'static str);

impl Middleware<String, String> for Halt {
    fn handle<'a>(
        &'a self,
        _request: String,
        _next: Next<'a, String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(self.0.to_owned()) })
    }
}

struct Counted(Arc<AtomicUsize>);

impl Middleware<String, String> for Counted {
    fn handle<'a>(
        &'a self,
        request: String,
        next: Next<'a, String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.run(request)
    }
}

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
}

/// Prefixes the response with its configured role.
#[derive(Default)]
struct RoleTag {
    role: String,
}

impl Middleware<String, String> for RoleTag {
    fn handle<'a>(
        &'a self,
        request: String,
        next: Next<'a, String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = next.run(request).await?;
            Ok(format!("{}|{response}", self.role))
        })
    }
}

impl AttributeMiddleware<String, String> for RoleTag {
    fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
        self.role = attributes.str("role")?.to_owned();
        Ok(())
    }
}

#[tokio::test]
async fn empty_pipeline_matches_terminal() {
    let terminal = echo();
    let p = pipeline::build(Vec::new(), Arc::clone(&terminal));

    for input in ["", "a", "some longer request"] {
        assert_eq!(
            p.handle(input.to_owned()).await.unwrap(),
            terminal.handle(input.to_owned()).await.unwrap()
        );
    }
}

#[tokio::test]
async fn pass_through_layer_is_transparent() {
    let terminal = echo();
    let layers: Vec<BoxedMiddleware<String, String>> = vec![Arc::new(PassThrough)];
    let p = pipeline::build(layers, Arc::clone(&terminal));

    assert_eq!(
        p.handle("r".to_owned()).await.unwrap(),
        terminal.handle("r".to_owned()).await.unwrap()
    );
}

#[tokio::test]
async fn short_circuit_skips_everything_downstream() {
    let inner_calls = Arc::new(AtomicUsize::new(0));
    let terminal_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&terminal_calls);

    let p = Pipeline::builder()
        .layer(Halt("stopped"))
        .layer(Counted(Arc::clone(&inner_calls)))
        .build(handler_fn(move |req: String| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(req) }
        }))
        .unwrap();

    assert_eq!(p.handle("r".to_owned()).await.unwrap(), "stopped");
    assert_eq!(inner_calls.load(Ordering::SeqCst), 0);
    assert_eq!(terminal_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn first_layer_is_outermost() {
    let log: Log = Arc::default();
    let terminal_log = Arc::clone(&log);

    let layers: Vec<BoxedMiddleware<String, String>> = vec![
        Arc::new(Trace { label: "A", log: Arc::clone(&log) }),
        Arc::new(Trace { label: "B", log: Arc::clone(&log) }),
    ];
    let p = pipeline::build(
        layers,
        Arc::new(handler_fn(move |req: String| {
            let log = Arc::clone(&terminal_log);
            async move {
                log.lock().unwrap().push("T".to_owned());
                Ok(req)
            }
        })),
    );

    p.handle("r".to_owned()).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["A-before", "B-before", "T", "B-after", "A-after"]
    );
}

#[tokio::test]
async fn attribute_maps_stay_with_their_instance() {
    let admin = Pipeline::builder()
        .layer_with(RoleTag::default(), Attributes::new().with("role", "admin"))
        .build_boxed(echo())
        .unwrap();
    let user = Pipeline::builder()
        .layer_with(RoleTag::default(), Attributes::new().with("role", "user"))
        .build_boxed(echo())
        .unwrap();

    assert_eq!(admin.handle("r".to_owned()).await.unwrap(), "admin|echo:r");
    assert_eq!(user.handle("r".to_owned()).await.unwrap(), "user|echo:r");
    assert_eq!(admin.handle("r".to_owned()).await.unwrap(), "admin|echo:r");
}

#[tokio::test]
async fn registry_bindings_stay_isolated() {
    let mut registry = MiddlewareRegistry::new();
    registry.register_configurable("tag", RoleTag::default);
    let registry = Arc::new(registry);

    let admin = Pipeline::builder()
        .registry(Arc::clone(&registry))
        .named("tag:role=admin")
        .build_boxed(echo())
        .unwrap();
    let user = Pipeline::builder()
        .registry(registry)
        .named("tag:role=user")
        .build_boxed(echo())
        .unwrap();

    assert_eq!(admin.handle("x".to_owned()).await.unwrap(), "admin|echo:x");
    assert_eq!(user.handle("x".to_owned()).await.unwrap(), "user|echo:x");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traversals_do_not_interfere() {
    let p = Pipeline::builder()
        .layer_with(RoleTag::default(), Attributes::new().with("role", "svc"))
        .layer(PassThrough)
        .build(handler_fn(|req: String| async move {
            tokio::task::yield_now().await;
            Ok(req.to_uppercase())
        }))
        .unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let p = p.clone();
            tokio::spawn(async move { (i, p.handle(format!("req-{i}")).await) })
        })
        .collect();

    for task in tasks {
        let (i, response) = task.await.unwrap();
        assert_eq!(response.unwrap(), format!("svc|REQ-{i}"));
    }
}

#[tokio::test]
async fn errors_propagate_through_after_logic() {
    let log: Log = Arc::default();
    let p = Pipeline::builder()
        .layer(Trace { label: "A", log: Arc::clone(&log) })
        .layer_with(RoleTag::default(), Attributes::new().with("role", "admin"))
        .build(handler_fn(|_: String| async {
            Err::<String, _>(Error::handler("terminal exploded"))
        }))
        .unwrap();

    let err = p.handle("r".to_owned()).await.unwrap_err();
    assert_eq!(err.to_string(), "handler failed: terminal exploded");
    assert_eq!(*log.lock().unwrap(), ["A-before", "A-after"]);
}

#[test]
fn composition_errors_surface_at_build() {
    let mut registry = MiddlewareRegistry::<String, String>::new();
    registry.register("pass", || PassThrough);
    registry.group("loop", ["pass", "loop"]).unwrap();
    let registry = Arc::new(registry);

    let unknown = Pipeline::builder()
        .registry(Arc::clone(&registry))
        .named("missing")
        .build_boxed(echo());
    assert!(matches!(unknown, Err(Error::UnknownMiddleware { name }) if name == "missing"));

    let cycle = Pipeline::builder()
        .registry(Arc::clone(&registry))
        .named("loop")
        .build_boxed(echo());
    assert!(matches!(cycle, Err(Error::GroupCycle { name }) if name == "loop"));

    let rejected = Pipeline::builder()
        .registry(registry)
        .named("pass:mode=fast")
        .build_boxed(echo());
    assert!(matches!(rejected, Err(Error::AttributesNotSupported { .. })));
}

#[tokio::test]
async fn http_pipeline_from_config() {
    let mut registry = MiddlewareRegistry::new();
    registry.register("logger", || onionskin::middleware::LoggerMiddleware);
    registry.register_configurable("cors", onionskin::security::CorsMiddleware::new);
    registry.register_configurable("role", RoleGuard::default);

    let config = PipelineConfig::from_json(
        r#"{
            "groups": { "web": ["logger", "cors"] },
            "middleware": ["web", { "name": "role", "attributes": { "role": "admin" } }]
        }"#,
    )
    .unwrap();
    registry.load_groups(&config).unwrap();

    let p = Pipeline::builder()
        .registry(Arc::new(registry))
        .config(&config)
        .build(handler_fn(|ctx: Context| async move {
            let role = ctx
                .extensions()
                .get::<GrantedRole>()
                .map(|granted| granted.0.clone())
                .unwrap_or_default();
            Ok(Response::new(StatusCode::Ok).body(role))
        }))
        .unwrap();
    assert_eq!(p.layer_names(), ["logger", "cors", "role"]);

    let allowed = p
        .handle(Context::new(
            Request::new(Method::Get, "/admin").header("X-Role", "admin"),
        ))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::Ok);
    assert_eq!(allowed.content(), b"admin");

    let denied = p
        .handle(Context::new(Request::new(Method::Get, "/admin")))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::Forbidden);
}
