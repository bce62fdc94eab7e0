mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{
    dispatcher::ResultDispatcher, images::ImageService, inspector::GeminiInspector,
    storage::ObjectStoreClient,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing goods-inspect server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "inspection_requests_total",
        "Inspection requests claimed from the queue"
    );
    metrics::describe_counter!(
        "inspection_approved_total",
        "Requests finalized as approved"
    );
    metrics::describe_counter!(
        "inspection_rejected_total",
        "Requests rejected by the AI inspector"
    );
    metrics::describe_counter!(
        "inspection_failed_total",
        "Requests that failed terminally after retries"
    );
    metrics::describe_histogram!(
        "inspection_provider_seconds",
        "AI provider call latency per request"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize object store client
    tracing::info!("Initializing object store client");
    let storage = ObjectStoreClient::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object store client");

    // Initialize pipeline services
    let images = ImageService::new(config.image_base_url.clone());
    let inspector = GeminiInspector::new(
        config.gemini_api_url.clone(),
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    );
    let dispatcher = ResultDispatcher::new(
        config.callback_url.clone(),
        config.monitoring_url.clone(),
        config.monitoring_enabled,
    );

    let bind_addr = config.bind_addr.clone();

    // Create shared application state
    let state = AppState::new(db_pool, config, storage, images, inspector, dispatcher);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/goods-batch/inspect", get(routes::batch::trigger_ingestion))
        .route("/goods-batch/get-results", get(routes::batch::get_results))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting goods-inspect on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
