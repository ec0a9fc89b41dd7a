use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use anonbox_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity of whoever is calling a public route: `Some` when the request
/// carried a valid session token.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Claims>);

pub fn decode_token(secret: &str, token: &str) -> jsonwebtoken::errors::Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Extract and validate the session token from the Authorization header.
/// The decoded claims are handed to the handler as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(&state.jwt_secret, token).map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Like [`require_auth`] but never rejects: anonymous callers get
/// `Viewer(None)`, and so do callers with a bad token.
pub async fn resolve_viewer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let claims = bearer_token(req.headers())
        .and_then(|token| decode_token(&state.jwt_secret, token).ok());

    req.extensions_mut().insert(Viewer(claims));
    next.run(req).await
}
