use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use anonbox_types::api::{AcceptMessagesRequest, AcceptMessagesResponse, Claims};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, with_db};

/// Persist the accepting flag. Setting the current value again is a no-op
/// that still succeeds.
pub async fn set_accepting(
    state: &AppState,
    user_id: Uuid,
    accepting: bool,
) -> Result<bool, ApiError> {
    let uid = user_id.to_string();
    let updated = with_db(state, move |db| db.set_accepting_messages(&uid, accepting)).await?;
    if !updated {
        return Err(ApiError::UserNotFound);
    }

    info!("User {} now accepting messages: {}", user_id, accepting);
    Ok(accepting)
}

pub async fn get_accepting(state: &AppState, user_id: Uuid) -> Result<bool, ApiError> {
    let uid = user_id.to_string();
    with_db(state, move |db| db.get_accepting_messages(&uid))
        .await?
        .ok_or(ApiError::UserNotFound)
}

/// GET /accept-messages
pub async fn get_accept_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let accepting = get_accepting(&state, claims.sub).await?;
    Ok(Json(AcceptMessagesResponse {
        success: true,
        message: "Message acceptance status found.".to_string(),
        is_accepting_messages: accepting,
    }))
}

/// POST /accept-messages
pub async fn update_accept_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<AcceptMessagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let accepting = set_accepting(&state, claims.sub, req.is_accepting_messages).await?;
    Ok(Json(AcceptMessagesResponse {
        success: true,
        message: "Message acceptance status updated successfully.".to_string(),
        is_accepting_messages: accepting,
    }))
}
