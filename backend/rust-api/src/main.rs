use std::sync::Arc;

use anyhow::Context;
use quizer_api::{
    config::{Config, StorageBackend},
    create_router,
    services::{catalog_seed, expiry_worker::ExpiryWorker, AppState},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let tracer_provider = init_telemetry()?;
    let tracer = {
        use opentelemetry::trace::TracerProvider as _;
        tracer_provider.tracer("quizer-api")
    };

    // LOG_FORMAT=json switches to structured output for log shippers
    let fmt_layer = if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizer_api=debug,tower_http=debug".into()),
        )
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!("Starting Quizer API");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        backend = ?config.storage_backend,
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let app_state = Arc::new(build_state(config).await?);

    catalog_seed::bootstrap(&app_state.config, app_state.catalog.as_ref())
        .await
        .context("Failed to seed catalog")?;

    let worker = ExpiryWorker::new(&app_state);
    tokio::spawn(async move {
        if let Err(err) = worker.run().await {
            tracing::error!(error = %err, "Expiry worker stopped");
        }
    });

    let app = create_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&app_state.config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", app_state.config.bind_addr))?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down OpenTelemetry");
    if let Err(err) = tracer_provider.shutdown() {
        tracing::warn!(error = %err, "OpenTelemetry shutdown failed");
    }

    Ok(())
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok(AppState::in_memory(config))
        }
        StorageBackend::Mongo => {
            let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
                .await
                .context("Failed to connect to MongoDB")?;
            tracing::info!("MongoDB connected");

            let redis_client = redis::Client::open(config.redis_uri.clone())
                .context("Failed to create Redis client")?;

            AppState::new(config, mongo_client, redis_client)
                .await
                .context("Failed to initialize application state")
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

fn init_telemetry() -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
        .context("Failed to create OTLP exporter")?;

    let resource = Resource::builder_empty()
        .with_service_name("quizer-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}
