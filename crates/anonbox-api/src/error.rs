//! Error taxonomy for every anonbox endpoint.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use anonbox_types::api::{ErrorResponse, FieldError};

/// All the ways a request can fail.
///
/// The `Display` text doubles as the `message` field of the response body,
/// except for [`ApiError::Internal`], whose details are only logged.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, with one entry per offending field.
    #[error("{}", join_messages(.0))]
    Validation(Vec<FieldError>),

    /// Missing, malformed or expired session token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Sign-in identifier matched no account.
    #[error("Invalid credentials.")]
    UnknownIdentifier,

    /// Correct account, email never confirmed.
    #[error("Please verify your email to login.")]
    Unverified,

    /// Password does not match the stored hash.
    #[error("Invalid credentials.")]
    InvalidCredential,

    #[error("User not found.")]
    UserNotFound,

    #[error("Message not found or already deleted.")]
    MessageNotFound,

    #[error("Username is already taken.")]
    UsernameTaken,

    #[error("User with this email already exists.")]
    EmailTaken,

    #[error("Verification code expired. Please sign up again to get a new code.")]
    CodeExpired,

    #[error("Invalid verification code.")]
    InvalidCode,

    #[error("User is not accepting messages.")]
    NotAccepting,

    /// The mail provider or the completion API failed.
    #[error("{0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn join_messages(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return "Invalid request.".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ApiError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::UsernameTaken
            | Self::EmailTaken
            | Self::CodeExpired
            | Self::InvalidCode => StatusCode::BAD_REQUEST,
            Self::Unauthorized
            | Self::UnknownIdentifier
            | Self::Unverified
            | Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::UserNotFound | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::NotAccepting => StatusCode::FORBIDDEN,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, errors) = match self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                ("Something went wrong. Please try again.".to_string(), Vec::new())
            }
            Self::Validation(errors) => (join_messages(&errors), errors),
            other => (other.to_string(), Vec::new()),
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                message,
                errors,
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid("body", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid("query", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ApiError::invalid("username", "bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Unverified.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::UserNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MessageNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::UsernameTaken.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotAccepting.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Upstream("mail".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_message_joins_fields() {
        let err = ApiError::Validation(vec![
            FieldError { field: "username".into(), message: "too short".into() },
            FieldError { field: "email".into(), message: "invalid".into() },
        ]);
        assert_eq!(err.to_string(), "too short, invalid");
    }

    #[test]
    fn unverified_and_invalid_credential_stay_distinct() {
        assert_ne!(ApiError::Unverified.to_string(), ApiError::InvalidCredential.to_string());
    }
}
