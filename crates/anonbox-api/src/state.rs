use std::sync::Arc;

use anonbox_db::Database;
use tracing::error;

use crate::completion::CompletionClient;
use crate::error::ApiError;
use crate::mailer::Mailer;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler may touch. Built once in `main` and handed to the
/// router; there is no other shared state between requests.
pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub session_ttl: chrono::Duration,
    pub mailer: Arc<dyn Mailer>,
    pub completion: Arc<dyn CompletionClient>,
}

/// Run a blocking store call off the async runtime.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.clone();
    tokio::task::spawn_blocking(move || f(&db.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::Internal)
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::completion::OpenAiCompatClient;
    use crate::mailer::LogMailer;

    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "test-secret".to_string(),
        session_ttl: chrono::Duration::days(1),
        mailer: Arc::new(LogMailer),
        completion: Arc::new(
            OpenAiCompatClient::new(None, "http://127.0.0.1:9".into(), "m".into()).unwrap(),
        ),
    })
}
