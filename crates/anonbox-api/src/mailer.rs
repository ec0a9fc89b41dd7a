use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::info;

/// Delivers verification codes. Implementations must be safe to share
/// across requests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()>;
}

pub const VERIFICATION_SUBJECT: &str = "Anonbox | Verification Email";

const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ResendSendEmailBody<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: String,
    text: String,
}

/// Sends mail through the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(MAIL_TIMEOUT)
            .build()
            .context("Failed to build mail HTTP client")?;
        Ok(Self {
            client,
            api_key,
            from,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()> {
        let (html, text) = render_verification_email(username, code);
        let body = ResendSendEmailBody {
            from: &self.from,
            to: vec![email],
            subject: VERIFICATION_SUBJECT,
            html,
            text,
        };

        let resp = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Mail request failed")?;

        let status = resp.status();
        if status.is_success() {
            info!("Verification email sent to {}", email);
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        bail!("Resend send failed (status={status}): {body}")
    }
}

/// Connection settings for [`SmtpMailer`].
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS from the first byte (usually port 465). Otherwise the
    /// connection is upgraded with STARTTLS.
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings, from: &str) -> Result<Self> {
        let from: Mailbox = from
            .parse()
            .with_context(|| format!("Invalid sender address '{from}'"))?;

        let relay = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        };
        let mut builder = relay
            .with_context(|| format!("Invalid SMTP host '{}'", settings.host))?
            .port(settings.port)
            .timeout(Some(MAIL_TIMEOUT));
        if let (Some(user), Some(pass)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()> {
        let (html, text) = render_verification_email(username, code);
        let to: Mailbox = email
            .parse()
            .with_context(|| format!("Invalid recipient address '{email}'"))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(VERIFICATION_SUBJECT)
            .multipart(MultiPart::alternative_plain_html(text, html))
            .context("Failed to build verification email")?;

        self.transport.send(message).await.context("SMTP send failed")?;
        info!("Verification email sent to {} over SMTP", email);
        Ok(())
    }
}

/// Development mailer: writes the code to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()> {
        info!(%email, %username, %code, "Mail delivery disabled; verification code logged");
        Ok(())
    }
}

/// Returns the (html, text) bodies of the verification email.
pub fn render_verification_email(username: &str, code: &str) -> (String, String) {
    let name = escape_html(username);
    let otp = escape_html(code);
    let html = format!(
        "<!DOCTYPE html>\
         <html lang=\"en\"><head><title>Verification Email</title></head>\
         <body style=\"font-family: Roboto, Verdana, sans-serif\">\
         <h2>Hey {name},</h2>\
         <p>Thank you for registering. Please use the following verification code \
         to complete your registration:</p>\
         <p style=\"font-size: 24px; letter-spacing: 4px\"><strong>{otp}</strong></p>\
         <p>This code expires in one hour. If you did not request it, \
         you can ignore this email.</p>\
         </body></html>"
    );
    let text = format!(
        "Hey {username},\n\n\
         Thank you for registering. Please use the following verification code \
         to complete your registration:\n\n\
         {code}\n\n\
         This code expires in one hour."
    );
    (html, text)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_contains_code_and_name() {
        let (html, text) = render_verification_email("alice", "123456");
        assert!(html.contains("Hey alice,"));
        assert!(html.contains("123456"));
        assert!(text.contains("123456"));
    }

    #[test]
    fn html_body_is_escaped() {
        let (html, _) = render_verification_email("<b>eve</b>", "1&2");
        assert!(html.contains("&lt;b&gt;eve&lt;/b&gt;"));
        assert!(html.contains("1&amp;2"));
        assert!(!html.contains("<b>eve"));
    }

    fn smtp_settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: Some("mailer".into()),
            password: Some("hunter2".into()),
        }
    }

    #[test]
    fn smtp_mailer_builds_without_connecting() {
        assert!(SmtpMailer::new(smtp_settings(), "Anonbox <no-reply@example.com>").is_ok());

        let implicit_tls = SmtpSettings {
            port: 465,
            secure: true,
            ..smtp_settings()
        };
        assert!(SmtpMailer::new(implicit_tls, "no-reply@example.com").is_ok());
    }

    #[test]
    fn smtp_mailer_rejects_a_bad_sender() {
        assert!(SmtpMailer::new(smtp_settings(), "not an address").is_err());
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        LogMailer.send_verification("a@x.com", "alice", "123456").await.unwrap();
    }
}
