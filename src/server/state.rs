//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::library::CatalogBuilder;
use crate::progress::ProgressStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Reading progress store.
    pub progress: Arc<ProgressStore>,
    /// Catalog builder for the books directory.
    pub catalog: Arc<CatalogBuilder>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new_with_db(config: Config, db: Database) -> Result<Self> {
        let auth = AuthService::new(
            db.clone(),
            config.auth.policy(),
            tracing::info_span!("auth"),
        );
        let progress = ProgressStore::new(db, tracing::info_span!("progress"));
        let catalog = CatalogBuilder::new(
            config.catalog.books_dir.clone(),
            config.catalog.workers,
            config.catalog.on_extraction_error,
            tracing::info_span!("catalog", root = %config.catalog.books_dir.display()),
        )?;

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            progress: Arc::new(progress),
            catalog: Arc::new(catalog),
        })
    }

    /// Run store, hashing or filesystem work on the blocking pool.
    pub async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&AppState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || work(&state))
            .await
            .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
    }
}
