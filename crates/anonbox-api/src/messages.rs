use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use anonbox_db::{parse_timestamp, timestamp};
use anonbox_db::models::MessageRow;
use anonbox_types::api::{
    Claims, MessageResponse, MessagesResponse, SendMessageRequest, StatusResponse,
};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::Viewer;
use crate::state::{AppState, with_db};
use crate::validation::validate_content;

/// Deliver `content` to `recipient`, tagging the sender when the visitor
/// is signed in. The recipient's accepting flag is read once, at delivery.
pub async fn deliver_message(
    state: &AppState,
    recipient: &str,
    content: &str,
    sender: Option<&Claims>,
    now: DateTime<Utc>,
) -> Result<Uuid, ApiError> {
    let content = validate_content(content)?;

    let name = recipient.to_string();
    let recipient = with_db(state, move |db| db.get_user_by_username(&name))
        .await?
        .ok_or(ApiError::UserNotFound)?;

    if !recipient.is_accepting_messages {
        return Err(ApiError::NotAccepting);
    }

    let message_id = Uuid::new_v4();
    let mid = message_id.to_string();
    let rid = recipient.id.clone();
    let sid = sender.map(|c| c.sub.to_string());
    let created_at = timestamp(now);
    with_db(state, move |db| {
        db.insert_message(&mid, &rid, sid.as_deref(), &content, &created_at)
    })
    .await?;

    info!("Message {} delivered to {}", message_id, recipient.username);
    Ok(message_id)
}

fn message_response(row: MessageRow) -> Result<MessageResponse, ApiError> {
    let id = row.id.parse().map_err(|e| anyhow::anyhow!("Corrupt message id '{}': {}", row.id, e))?;
    let created_at = parse_timestamp(&row.created_at)?;
    Ok(MessageResponse {
        id,
        content: row.content,
        created_at,
        sender: row.sender_username,
    })
}

/// Messages received by `user_id`, newest first.
pub async fn list_messages(
    state: &AppState,
    user_id: Uuid,
) -> Result<Vec<MessageResponse>, ApiError> {
    let uid = user_id.to_string();
    let rows = with_db(state, move |db| {
        if db.get_user_by_id(&uid)?.is_none() {
            return Ok(None);
        }
        db.get_messages_for_recipient(&uid).map(Some)
    })
    .await?
    .ok_or(ApiError::UserNotFound)?;

    rows.into_iter().map(message_response).collect()
}

/// Remove a message the caller received. Someone else's message, or one
/// that does not exist, is reported as not found and left untouched.
pub async fn remove_message(
    state: &AppState,
    user_id: Uuid,
    message_id: &str,
) -> Result<(), ApiError> {
    let mid = message_id.to_string();
    let uid = user_id.to_string();
    let removed = with_db(state, move |db| db.delete_message(&mid, &uid)).await?;

    if !removed {
        warn!("Delete of message {} by {} matched nothing", message_id, user_id);
        return Err(ApiError::MessageNotFound);
    }
    Ok(())
}

/// POST /send-message
pub async fn send_message(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    deliver_message(&state, &req.username, &req.content, viewer.0.as_ref(), Utc::now()).await?;

    Ok(Json(StatusResponse::ok("Message sent successfully.")))
}

/// GET /get-messages
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = list_messages(&state, claims.sub).await?;
    Ok(Json(MessagesResponse {
        success: true,
        messages,
    }))
}

/// DELETE /delete-message/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    remove_message(&state, claims.sub, &message_id).await?;
    Ok(Json(StatusResponse::ok("Message deleted successfully.")))
}
