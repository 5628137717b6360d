pub mod auth;
pub mod conversations;
pub mod messages;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use parley_db::Database;

pub use auth::{AppState, AppStateInner, create_token};
pub use routes::router;

/// Run a blocking database call off the async runtime, logging any failure
/// and reporting it as a 500.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db: Arc<Database> = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
