//! Shared application state, constructed once at startup and cloned into
//! every axum handler. Every service here is an explicit field — no
//! module-level globals — built eagerly rather than behind a deferred
//! `Option<RwLock<_>>` init hook, since the HTTP server has no framework
//! lifecycle to wait on before the database and config are ready.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DatabaseManager;
use crate::live_mode::session::LiveModeSlot;
use crate::model_manager::{JobTracker, ModelManager, SharedJobTracker, SharedModelManager};
use crate::token_store::TokenStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseManager>,
    pub tokens: Arc<TokenStore>,
    pub models: SharedModelManager,
    pub jobs: SharedJobTracker,
    pub live_mode: LiveModeSlot,
}

impl AppState {
    pub fn new(config: AppConfig, db: DatabaseManager, tokens: TokenStore) -> Self {
        let models_dir = config.data_dir.join("models");
        Self {
            config: Arc::new(config),
            db: Arc::new(db),
            tokens: Arc::new(tokens),
            models: Arc::new(ModelManager::new(models_dir)) as SharedModelManager,
            jobs: Arc::new(JobTracker::new()) as SharedJobTracker,
            live_mode: LiveModeSlot::new(),
        }
    }
}
