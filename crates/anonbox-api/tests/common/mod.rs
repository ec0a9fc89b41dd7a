#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use uuid::Uuid;

use anonbox_api::completion::{CompletionClient, TextStream};
use anonbox_api::mailer::Mailer;
use anonbox_api::{AppState, AppStateInner, registration, verification};
use anonbox_db::Database;
use anonbox_types::api::SignUpRequest;

pub const JWT_SECRET: &str = "test-secret";

#[derive(Debug, Clone)]
pub struct SentCode {
    pub email: String,
    pub username: String,
    pub code: String,
}

/// Keeps every verification mail instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentCode>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.email == email)
            .map(|s| s.code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()> {
        if self.fail {
            bail!("mail provider unavailable");
        }
        self.sent.lock().unwrap().push(SentCode {
            email: email.to_string(),
            username: username.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }
}

/// Replays fixed text pieces and remembers the prompts it was given.
#[derive(Default)]
pub struct CannedCompletion {
    pieces: Vec<String>,
    fail: bool,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedCompletion {
    pub fn new(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_string()).collect(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            pieces: Vec::new(),
            fail: true,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn stream_completion(&self, prompt: String) -> Result<TextStream> {
        self.prompts.lock().unwrap().push(prompt);
        if self.fail {
            bail!("completion API unavailable");
        }
        let pieces: Vec<Result<String>> = self.pieces.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(pieces)))
    }
}

pub fn state_with(mailer: Arc<RecordingMailer>, completion: Arc<CannedCompletion>) -> AppState {
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: JWT_SECRET.to_string(),
        session_ttl: chrono::Duration::days(1),
        mailer,
        completion,
    })
}

pub fn test_state() -> (AppState, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let state = state_with(mailer.clone(), Arc::new(CannedCompletion::default()));
    (state, mailer)
}

pub fn sign_up(username: &str, email: &str, password: &str) -> SignUpRequest {
    SignUpRequest {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    }
}

/// Register and verify an account, returning its id.
pub async fn verified_user(
    state: &AppState,
    mailer: &RecordingMailer,
    username: &str,
    email: &str,
    now: DateTime<Utc>,
) -> Uuid {
    registration::register(state, sign_up(username, email, "Passw0rd!"), now)
        .await
        .unwrap();
    let code = mailer.last_code_for(email).unwrap();
    verification::verify_account(state, username, &code, now).await.unwrap();
    registration::lookup_user_id(state, username).await.unwrap()
}
