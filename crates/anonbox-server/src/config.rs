use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use anonbox_api::mailer::SmtpSettings;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// Ten years; keeps token expiry arithmetic far from chrono's limits.
const MAX_SESSION_DAYS: i64 = 3650;

const DEFAULT_MAIL_FROM: &str = "Anonbox <onboarding@resend.dev>";
const DEFAULT_RESEND_BASE_URL: &str = "https://api.resend.com";
const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_COMPLETION_MODEL: &str = "llama3-8b-8192";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub session_days: i64,
    pub resend_api_key: Option<String>,
    pub mail_from: String,
    pub resend_base_url: String,
    pub smtp: Option<SmtpSettings>,
    pub completion_api_key: Option<String>,
    pub completion_base_url: String,
    pub completion_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("ANONBOX_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ANONBOX_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("ANONBOX_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("Invalid ANONBOX_PORT '{raw}'"))?,
            None => 3000,
        };
        let session_days = match get("ANONBOX_SESSION_DAYS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid ANONBOX_SESSION_DAYS '{raw}'"))?,
            None => 30,
        };
        if !(1..=MAX_SESSION_DAYS).contains(&session_days) {
            bail!("ANONBOX_SESSION_DAYS must be between 1 and {MAX_SESSION_DAYS}");
        }

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                host,
                port: match get("SMTP_PORT") {
                    Some(raw) => raw.parse().with_context(|| format!("Invalid SMTP_PORT '{raw}'"))?,
                    None => 587,
                },
                secure: match get("SMTP_SECURE").as_deref() {
                    None | Some("false") => false,
                    Some("true") => true,
                    Some(raw) => bail!("Invalid SMTP_SECURE '{raw}' (expected true or false)"),
                },
                username: get("SMTP_USER"),
                password: get("SMTP_PASS"),
            }),
            None => None,
        };

        Ok(Self {
            host: get("ANONBOX_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("ANONBOX_DB_PATH").unwrap_or_else(|| "anonbox.db".into()).into(),
            jwt_secret,
            session_days,
            resend_api_key: get("RESEND_API_KEY"),
            mail_from: get("ANONBOX_MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.into()),
            resend_base_url: get("RESEND_BASE_URL")
                .unwrap_or_else(|| DEFAULT_RESEND_BASE_URL.into()),
            smtp,
            completion_api_key: get("COMPLETION_API_KEY"),
            completion_base_url: get("COMPLETION_BASE_URL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_BASE_URL.into()),
            completion_model: get("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.into()),
        })
    }
}
