use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use anonbox_db::models::{NewUser, UserRow};
use anonbox_db::{parse_timestamp, timestamp};
use anonbox_types::api::{SignUpRequest, StatusResponse, UserIdResponse, UsernameQuery};

use crate::auth::hash_password;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::state::{AppState, with_db};
use crate::validation::{normalize_email, validate_sign_up, validate_username};
use crate::verification::issue_code;

/// Whether the current holder of a username keeps it away from a new
/// registration. Verified holders always do. Unverified holders reserve the
/// name until their code expires, unless the registrant is re-registering
/// the same email (then it is their own pending record).
fn holds_username(
    holder: &UserRow,
    registrant_email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, ApiError> {
    if holder.is_verified {
        return Ok(true);
    }
    if registrant_email == Some(holder.email.as_str()) {
        return Ok(false);
    }
    let expires_at = parse_timestamp(&holder.verify_code_expires_at)?;
    Ok(now < expires_at)
}

/// Fields written for a pending account, whether new or repurposed.
struct PendingAccount {
    username: String,
    email: String,
    password_hash: String,
    code: String,
    expires_at: String,
    created_at: String,
}

/// Delete a stale reservation held by someone else. Fails with
/// `UsernameTaken` if the holder was verified (or removed) in the meantime.
async fn release_reservation(state: &AppState, holder: &UserRow) -> Result<(), ApiError> {
    let id = holder.id.clone();
    if !with_db(state, move |db| db.delete_unverified_user(&id)).await? {
        warn!("Reservation of {} changed before it could be released", holder.username);
        return Err(ApiError::UsernameTaken);
    }
    info!("Released stale reservation of username {}", holder.username);
    Ok(())
}

/// Write the pending account: repurpose `existing` when the email already
/// has an unverified record, otherwise insert a fresh row. Fails with
/// `EmailTaken` if that record was verified or removed meanwhile.
async fn store_pending(
    state: &AppState,
    existing: Option<&UserRow>,
    account: PendingAccount,
) -> Result<(), ApiError> {
    match existing {
        Some(pending) => {
            let id = pending.id.clone();
            let username = account.username.clone();
            let updated = with_db(state, move |db| {
                db.update_pending_user(
                    &id,
                    &account.username,
                    &account.password_hash,
                    &account.code,
                    &account.expires_at,
                )
            })
            .await?;
            if !updated {
                warn!("Pending record for {} changed before it could be reused", username);
                return Err(ApiError::EmailTaken);
            }
            info!("Re-issued verification code for pending account {}", username);
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let username = account.username.clone();
            with_db(state, move |db| {
                db.create_user(&NewUser {
                    id: &id,
                    username: &account.username,
                    email: &account.email,
                    password_hash: &account.password_hash,
                    verify_code: &account.code,
                    verify_code_expires_at: &account.expires_at,
                    created_at: &account.created_at,
                })
            })
            .await?;
            info!("Registered new account {}", username);
        }
    }
    Ok(())
}

/// Create or repurpose an unverified account and mail it a verification code.
///
/// Store writes are committed before the mail goes out, so a mail failure
/// leaves a registered account without a code in the user's inbox.
/// Registering again with the same email issues a fresh code.
pub async fn register(
    state: &AppState,
    req: SignUpRequest,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    validate_sign_up(&req)?;
    let email = normalize_email(&req.email);
    let username = req.username;

    let (holder, existing) = {
        let username = username.clone();
        let email = email.clone();
        with_db(state, move |db| {
            Ok((db.get_user_by_username(&username)?, db.get_user_by_email(&email)?))
        })
        .await?
    };

    if holder.as_ref().is_some_and(|h| h.is_verified) {
        return Err(ApiError::UsernameTaken);
    }
    if existing.as_ref().is_some_and(|u| u.is_verified) {
        return Err(ApiError::EmailTaken);
    }

    if let Some(holder) = &holder {
        if holds_username(holder, Some(&email), now)? {
            return Err(ApiError::UsernameTaken);
        }
        if holder.email != email {
            release_reservation(state, holder).await?;
        }
    }

    let issued = issue_code(now);
    let account = PendingAccount {
        username: username.clone(),
        email: email.clone(),
        password_hash: hash_password(&req.password)?,
        code: issued.code.clone(),
        expires_at: timestamp(issued.expires_at),
        created_at: timestamp(now),
    };
    store_pending(state, existing.as_ref(), account).await?;

    state
        .mailer
        .send_verification(&email, &username, &issued.code)
        .await
        .map_err(|e| {
            error!("Error sending verification email to {}: {:#}", email, e);
            ApiError::Upstream("Error sending verification email.".to_string())
        })
}

/// Advisory check used by the sign-up form while the user types.
pub async fn username_available(
    state: &AppState,
    username: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    validate_username(username)?;

    let name = username.to_string();
    let holder = with_db(state, move |db| db.get_user_by_username(&name)).await?;
    match holder {
        Some(holder) if holds_username(&holder, None, now)? => Err(ApiError::UsernameTaken),
        _ => Ok(()),
    }
}

pub async fn lookup_user_id(state: &AppState, username: &str) -> Result<Uuid, ApiError> {
    let name = username.to_string();
    let user = with_db(state, move |db| db.get_user_by_username(&name))
        .await?
        .ok_or(ApiError::UserNotFound)?;

    let id = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("Corrupt user id '{}': {}", user.id, e))?;
    Ok(id)
}

/// POST /sign-up
pub async fn sign_up(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    register(&state, req, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(StatusResponse::ok("User registered successfully. Please verify your email.")),
    ))
}

/// GET /check-username-unique?username=
pub async fn check_username_unique(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UsernameQuery>,
) -> Result<impl IntoResponse, ApiError> {
    username_available(&state, &query.username, Utc::now()).await?;
    Ok(Json(StatusResponse::ok("Username is available.")))
}

/// GET /get-user-by-username?username=
pub async fn get_user_by_username(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UsernameQuery>,
) -> Result<impl IntoResponse, ApiError> {
    user_id_response(&state, &query.username).await
}

/// GET /get-user-by-username/{username}
pub async fn get_user_by_username_path(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    user_id_response(&state, &username).await
}

async fn user_id_response(
    state: &AppState,
    username: &str,
) -> Result<Json<UserIdResponse>, ApiError> {
    let user_id = lookup_user_id(state, username).await?;
    Ok(Json(UserIdResponse {
        success: true,
        message: "User found.".to_string(),
        user_id,
    }))
}
