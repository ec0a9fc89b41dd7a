mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use anonbox_api::completion::{CompletionClient, OpenAiCompatClient};
use anonbox_api::mailer::{LogMailer, Mailer, ResendMailer, SmtpMailer};
use anonbox_api::{AppState, AppStateInner};

use crate::config::Config;

const DEFAULT_LOG_FILTER: &str = "anonbox=debug,anonbox_api=debug,anonbox_db=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = anonbox_db::Database::open(&config.db_path)?;

    let mailer: Arc<dyn Mailer> = match (&config.resend_api_key, &config.smtp) {
        (Some(key), _) => Arc::new(ResendMailer::new(
            key.clone(),
            config.mail_from.clone(),
            config.resend_base_url.clone(),
        )?),
        (None, Some(smtp)) => {
            info!("Sending verification mail through SMTP relay {}", smtp.host);
            Arc::new(SmtpMailer::new(smtp.clone(), &config.mail_from)?)
        }
        (None, None) => {
            warn!("No RESEND_API_KEY or SMTP_HOST; verification codes will be logged, not mailed");
            Arc::new(LogMailer)
        }
    };

    if config.completion_api_key.is_none() {
        warn!("COMPLETION_API_KEY not set; /suggest-messages will report upstream failures");
    }
    let completion: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatClient::new(
        config.completion_api_key.clone(),
        config.completion_base_url.clone(),
        config.completion_model.clone(),
    )?);

    let session_ttl = chrono::Duration::try_days(config.session_days)
        .context("ANONBOX_SESSION_DAYS is out of range")?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        session_ttl,
        mailer,
        completion,
    });

    let app = anonbox_api::app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Anonbox server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
