use chrono::{Local, Timelike};
use goods_inspect::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{
        dispatcher::ResultDispatcher, images::ImageService, inspector::GeminiInspector,
        processor, storage::ObjectStoreClient,
    },
};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

/// Ingestion polls every 15 minutes, but only inside the early-morning
/// window the export producer uploads in.
const INGESTION_TICK: Duration = Duration::from_secs(15 * 60);
const PROCESSING_TICK: Duration = Duration::from_secs(60);
const LIVENESS_TICK: Duration = Duration::from_secs(60 * 60);

// Four worker threads bound the whole scheduler; ticks are cheap and the
// heavy lifting is awaited I/O.
#[tokio::main(worker_threads = 4)]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting goods inspection worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = ObjectStoreClient::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object store client");

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

    let state = AppState::new(db_pool, config, storage, images, inspector, dispatcher);

    tracing::info!("Worker ready, starting tick loops");

    // Ingestion tick: poll the object store inside the daily window. The
    // database gate makes repeat ticks within one day no-ops.
    let ingestion = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(INGESTION_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !in_ingestion_window(Local::now().hour()) {
                    continue;
                }
                processor::run_ingestion_tick(&state).await;
            }
        })
    };

    // Processing tick: dispatched fire-and-forget so a slow provider run
    // can never delay the next tick from firing. Overlapping runs are
    // serialized by the claim update, not by this loop.
    let processing = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(PROCESSING_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let state = state.clone();
                tokio::spawn(async move {
                    let batch_count = state.config.batch_size_per_tick;
                    processor::process_pending_requests(&state, batch_count).await;
                });
            }
        })
    };

    // Retention tick: garbage-collect finished batch jobs at midnight.
    let cleanup = {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_midnight()).await;
                processor::remove_old_records(&state, state.config.retention_days).await;
            }
        })
    };

    // Liveness tick: hourly ping so monitoring sees the process even on
    // days with no batch.
    let liveness = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(LIVENESS_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                state.dispatcher.send_alive_ping().await;
            }
        })
    };

    let _ = tokio::join!(ingestion, processing, cleanup, liveness);
}

/// Exports are uploaded between 03:00 and 06:00 local time.
fn in_ingestion_window(hour: u32) -> bool {
    (3..=5).contains(&hour)
}

fn until_next_midnight() -> Duration {
    let now = Local::now().naive_local();
    let next = now
        .date()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .unwrap_or(now + chrono::Duration::days(1));
    (next - now).to_std().unwrap_or(Duration::from_secs(24 * 60 * 60))
}
