use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{Json, extract::State, response::IntoResponse};
use anyhow::Context;
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::debug;
use uuid::Uuid;

use anonbox_db::models::UserRow;
use anonbox_types::api::{Claims, SessionUser, SignInRequest, SignInResponse};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, with_db};

/// Hash a password with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Stored password hash is corrupt: {}", e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e).into()),
    }
}

pub(crate) fn session_user(row: &UserRow) -> Result<SessionUser, ApiError> {
    let id: Uuid = row
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("Corrupt user id '{}': {}", row.id, e))?;
    Ok(SessionUser {
        id,
        username: row.username.clone(),
        email: row.email.clone(),
        is_verified: row.is_verified,
        is_accepting_messages: row.is_accepting_messages,
    })
}

/// Check an identifier (username or email) and password.
///
/// The failure kinds are kept apart: no such account, account not yet
/// verified, wrong password. Nothing is written.
pub async fn authenticate(
    state: &AppState,
    identifier: &str,
    password: &str,
) -> Result<SessionUser, ApiError> {
    let ident = identifier.trim().to_string();
    let user = with_db(state, move |db| db.get_user_by_identifier(&ident))
        .await?
        .ok_or(ApiError::UnknownIdentifier)?;

    if !user.is_verified {
        return Err(ApiError::Unverified);
    }

    if !verify_password(password, &user.password)? {
        debug!("Password mismatch for {}", user.username);
        return Err(ApiError::InvalidCredential);
    }

    session_user(&user)
}

pub fn create_token(
    secret: &str,
    user: &SessionUser,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let expires_at = now
        .checked_add_signed(ttl)
        .context("Session lifetime overflows the token expiry")?;
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        is_verified: user.is_verified,
        is_accepting_messages: user.is_accepting_messages,
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// POST /sign-in
pub async fn sign_in(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &req.identifier, &req.password).await?;
    let token = create_token(&state.jwt_secret, &user, state.session_ttl, Utc::now())?;

    Ok(Json(SignInResponse {
        success: true,
        user,
        token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Passw0rd!", &hash).unwrap());
        assert!(!verify_password("Passw0rd?", &hash).unwrap());
    }

    #[test]
    fn corrupt_hash_is_an_internal_error() {
        assert!(matches!(
            verify_password("Passw0rd!", "not-a-hash"),
            Err(ApiError::Internal(_))
        ));
    }

    #[test]
    fn token_carries_the_identity_projection() {
        let user = SessionUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@x.com".into(),
            is_verified: true,
            is_accepting_messages: false,
        };
        let token = create_token("secret", &user, chrono::Duration::days(1), Utc::now()).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");
        assert!(claims.is_verified);
        assert!(!claims.is_accepting_messages);

        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn lifetime_past_the_calendar_is_an_error() {
        let user = SessionUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@x.com".into(),
            is_verified: true,
            is_accepting_messages: true,
        };
        let result = create_token("secret", &user, chrono::Duration::days(100_000_000), Utc::now());
        assert!(result.is_err());
    }
}
