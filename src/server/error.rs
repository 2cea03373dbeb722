//! Error → HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::conversation::ConversationError;
use crate::handoff::HandoffError;
use crate::uploads::PresignError;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub error: &'static str,
    /// Human-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// Errors returned by handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not valid JSON for the endpoint.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Body parsed but failed validation.
    #[error("validation failed")]
    Validation(Vec<String>),

    /// Unknown resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conversation no longer accepts messages.
    #[error("conversation closed: {0}")]
    ConversationClosed(String),

    /// Notification collaborator failed.
    #[error("handoff failed: {0}")]
    HandoffFailed(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidJson(_) => (StatusCode::BAD_REQUEST, "invalid_json"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::ConversationClosed(_) => (StatusCode::CONFLICT, "conversation_closed"),
            Self::HandoffFailed(_) => (StatusCode::BAD_GATEWAY, "handoff_failed"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let details = match self {
            Self::Validation(problems) => Some(problems),
            Self::InvalidJson(detail) | Self::HandoffFailed(detail) => Some(vec![detail]),
            Self::Internal(detail) => {
                error!(%detail, "Request failed");
                None
            }
            Self::NotFound(_) | Self::ConversationClosed(_) => None,
        };
        (status, Json(ErrorResponse { error: code, details })).into_response()
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::Validation(problems) => Self::Validation(problems),
            ConversationError::NotFound(id) => Self::NotFound(id.to_string()),
            ConversationError::ConversationClosed(id) => Self::ConversationClosed(id.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<PresignError> for ApiError {
    fn from(err: PresignError) -> Self {
        match err {
            PresignError::Validation(problems) => Self::Validation(problems),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<HandoffError> for ApiError {
    fn from(err: HandoffError) -> Self {
        match err {
            HandoffError::Config(detail) => Self::Internal(detail),
            other => Self::HandoffFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationId;

    #[test]
    fn test_status_mapping() {
        let id = ConversationId::new();
        let cases = [
            (ApiError::from(ConversationError::NotFound(id)), StatusCode::NOT_FOUND),
            (
                ApiError::from(ConversationError::ConversationClosed(id)),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(ConversationError::Validation(vec!["x".to_string()])),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(HandoffError::Exhausted {
                    attempts: 5,
                    last_error: "503".to_string(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::from(ConversationError::CorruptRecord("bad".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
