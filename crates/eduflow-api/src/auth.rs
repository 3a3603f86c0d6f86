use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use eduflow_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Shared secret the enrollment webhook must present, when configured.
    pub service_token: Option<String>,
}

impl AppStateInner {
    /// Run blocking DB work off the async runtime, mapping any failure to 500.
    pub async fn storage<F, T>(&self, f: F) -> Result<T, StatusCode>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("Storage error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })
    }

    /// Whether a webhook caller presented the configured service token.
    /// Always true when no token is configured.
    pub fn service_token_matches(&self, presented: Option<&str>) -> bool {
        match &self.service_token {
            None => true,
            Some(expected) => presented == Some(expected.as_str()),
        }
    }
}
