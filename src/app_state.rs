use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    dispatcher::ResultDispatcher, images::ImageService, inspector::GeminiInspector,
    storage::ObjectStoreClient,
};

/// Shared application state passed to route handlers and tick loops.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<ObjectStoreClient>,
    pub images: Arc<ImageService>,
    pub inspector: Arc<GeminiInspector>,
    pub dispatcher: Arc<ResultDispatcher>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        config: AppConfig,
        storage: ObjectStoreClient,
        images: ImageService,
        inspector: GeminiInspector,
        dispatcher: ResultDispatcher,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            storage: Arc::new(storage),
            images: Arc::new(images),
            inspector: Arc::new(inspector),
            dispatcher: Arc::new(dispatcher),
        }
    }
}
