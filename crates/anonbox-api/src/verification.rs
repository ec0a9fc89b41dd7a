use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{info, warn};

use anonbox_db::models::UserRow;
use anonbox_db::parse_timestamp;
use anonbox_types::api::{StatusResponse, VerifyCodeRequest};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, with_db};

/// Verification codes stay valid for one hour after issuance.
pub const CODE_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Draw a fresh 6-digit code and its expiry.
pub fn issue_code(now: DateTime<Utc>) -> IssuedCode {
    let code: u32 = rand::rng().random_range(100_000..=999_999);
    IssuedCode {
        code: code.to_string(),
        expires_at: now + Duration::seconds(CODE_TTL_SECS),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    Expired,
    Mismatch,
}

/// Expiry wins over correctness: an expired code is reported as expired
/// whether or not it matches.
pub fn check_code(
    stored: &str,
    expires_at: DateTime<Utc>,
    submitted: &str,
    now: DateTime<Utc>,
) -> CodeCheck {
    if now >= expires_at {
        CodeCheck::Expired
    } else if stored == submitted.trim() {
        CodeCheck::Valid
    } else {
        CodeCheck::Mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

pub async fn verify_account(
    state: &AppState,
    username: &str,
    submitted: &str,
    now: DateTime<Utc>,
) -> Result<VerifyOutcome, ApiError> {
    let name = username.to_string();
    let user = with_db(state, move |db| db.get_user_by_username(&name))
        .await?
        .ok_or(ApiError::UserNotFound)?;

    if user.is_verified {
        return Ok(VerifyOutcome::AlreadyVerified);
    }

    let expires_at = parse_timestamp(&user.verify_code_expires_at)?;
    match check_code(&user.verify_code, expires_at, submitted, now) {
        CodeCheck::Valid => finish_verification(state, &user).await,
        CodeCheck::Expired => {
            warn!("Expired verification code submitted for {}", user.username);
            Err(ApiError::CodeExpired)
        }
        CodeCheck::Mismatch => Err(ApiError::InvalidCode),
    }
}

/// Mark `user` verified. A concurrent verification of the same account
/// reports `AlreadyVerified`; a row removed meanwhile reports `UserNotFound`.
async fn finish_verification(
    state: &AppState,
    user: &UserRow,
) -> Result<VerifyOutcome, ApiError> {
    let id = user.id.clone();
    // Some(true): flipped here. Some(false): already verified. None: gone.
    let flipped = with_db(state, move |db| {
        if db.mark_verified(&id)? {
            return Ok(Some(true));
        }
        Ok(db.get_user_by_id(&id)?.map(|_| false))
    })
    .await?;

    match flipped {
        Some(true) => {
            info!("Account {} verified", user.username);
            Ok(VerifyOutcome::Verified)
        }
        Some(false) => Ok(VerifyOutcome::AlreadyVerified),
        None => {
            warn!("Account {} vanished before verification", user.username);
            Err(ApiError::UserNotFound)
        }
    }
}

/// POST /verify-code
pub async fn verify_code(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = verify_account(&state, &req.username, &req.verify_code, Utc::now()).await?;
    let message = match outcome {
        VerifyOutcome::Verified => "Account verified.",
        VerifyOutcome::AlreadyVerified => "Account already verified.",
    };
    Ok(Json(StatusResponse::ok(message)))
}
