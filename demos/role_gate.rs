//! Serves an admin-only endpoint behind a configured middleware pipeline.
//!
//! ```text
//! cargo run --example role_gate
//! curl -i localhost:8080/reports                    # 403
//! curl -i -H 'X-Role: admin' localhost:8080/reports # 200
//! ```
//!
//! Set `RUST_LOG=onionskin=debug` to watch the pipeline being composed.

use std::sync::Arc;

use onionskin::{
    Context, MiddlewareRegistry, Pipeline, PipelineConfig, Response, Server, StatusCode,
    handler_fn,
    middleware::LoggerMiddleware,
    security::{CorsMiddleware, GrantedRole, RoleGuard},
};

const PIPELINE: &str = r#"{
    "groups": { "web": ["logger", "cors:origins=https://app.example|http://localhost:3000"] },
    "middleware": [
        "web",
        { "name": "role", "attributes": { "role": "admin" } }
    ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "onionskin=info,warn".into()),
        )
        .init();

    let mut registry = MiddlewareRegistry::new();
    registry.register("logger", || LoggerMiddleware);
    registry.register_configurable("cors", CorsMiddleware::new);
    registry.register_configurable("role", RoleGuard::default);

    let config = PipelineConfig::from_json(PIPELINE)?;
    registry.load_groups(&config)?;

    let pipeline = Pipeline::builder()
        .registry(Arc::new(registry))
        .config(&config)
        .build(handler_fn(|ctx: Context| async move {
            let role = ctx
                .extensions()
                .get::<GrantedRole>()
                .map(|granted| granted.0.clone())
                .unwrap_or_default();
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body(format!("reports for {role}\n")))
        }))?;

    tracing::info!(layers = ?pipeline.layer_names(), "pipeline ready");

    let addr = std::env::var("ONIONSKIN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    Server::bind(addr).await?.run(pipeline).await?;
    Ok(())
}
