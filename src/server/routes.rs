//! HTTP route handlers for the intake API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::conversation::{
    Attachment, AuditEntry, Conversation, ConversationId, IntakeBrief, Message, MessageRole,
    NewConversation, NewMessage,
};
use crate::handoff::{HandoffRequest, HandoffStatus};
use crate::uploads::{UploadLink, UploadRequest};

use super::error::ApiError;
use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/api/conversations/{id}/audit", get(conversation_audit))
        .route("/api/conversations/{id}/message", post(append_message))
        .route("/api/conversations/{id}/end-and-send", post(end_and_send))
        .route("/api/uploads/presign", post(presign_upload))
        .route("/api/handoff/slack", post(slack_handoff))
        .route("/api/handoff/{id}", get(handoff_status))
        .with_state(state)
}

/// JSON body, whatever the `Content-Type` header says. Decoding failures
/// become `invalid_json`.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidJson(rejection.body_text()))?;
        serde_json::from_slice(&body)
            .map(Self)
            .map_err(|err| ApiError::InvalidJson(err.to_string()))
    }
}

/// Malformed ids cannot name an existing conversation.
fn conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(raw.to_string()))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "intake-handoff",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Conversation creation request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Participant display name.
    #[serde(default)]
    pub participant_name: Option<String>,
    /// Participant email.
    #[serde(default)]
    pub participant_email: Option<String>,
    /// Optional first message.
    #[serde(default)]
    pub initial_message: Option<String>,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state
        .manager
        .create(NewConversation {
            participant_name: request.participant_name.unwrap_or_default(),
            participant_email: request.participant_email.unwrap_or_default(),
            initial_message: request.initial_message,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let id = conversation_id(&id)?;
    Ok(Json(state.manager.get(id).await?))
}

/// Audit trail response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogResponse {
    /// Conversation the trail belongs to.
    pub conversation_id: ConversationId,
    /// Entries, oldest first.
    pub entries: Vec<AuditEntry>,
}

async fn conversation_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let id = conversation_id(&id)?;
    let entries = state.manager.audit_log(id).await?;
    Ok(Json(AuditLogResponse {
        conversation_id: id,
        entries,
    }))
}

/// Message creation request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Attached files.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Author; `user` when absent.
    #[serde(default)]
    pub role: Option<MessageRole>,
}

async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let id = conversation_id(&id)?;
    let message = state
        .manager
        .append_message(
            id,
            NewMessage {
                role: request.role.unwrap_or_default(),
                content: request.content,
                attachments: request.attachments,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// End-of-conversation request; the body may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConversationRequest {
    /// Notes appended to the brief.
    #[serde(default)]
    pub notes: Option<String>,
}

/// End-of-conversation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConversationResponse {
    /// The conversation after the call.
    pub conversation: Conversation,
    /// Whether this call queued a handoff.
    pub handoff_queued: bool,
}

async fn end_and_send(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<EndConversationResponse>, ApiError> {
    let request: EndConversationRequest = if body.iter().all(u8::is_ascii_whitespace) {
        EndConversationRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ApiError::InvalidJson(err.to_string()))?
    };
    let id = conversation_id(&id)?;

    let outcome = state.manager.end_conversation(id, request.notes).await?;
    Ok(Json(EndConversationResponse {
        conversation: outcome.conversation,
        handoff_queued: outcome.handoff_queued,
    }))
}

async fn presign_upload(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<UploadRequest>,
) -> Result<(StatusCode, Json<UploadLink>), ApiError> {
    let link = state.presigner.issue(&request, Utc::now())?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// Direct Slack handoff request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackHandoffRequest {
    /// Conversation the brief belongs to.
    pub conversation_id: String,
    /// Brief to post.
    pub brief: IntakeBrief,
    /// Channel override.
    #[serde(default)]
    pub destination_channel: Option<String>,
}

/// Direct Slack handoff response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackHandoffResponse {
    /// Whether the channel took the brief.
    pub accepted: bool,
    /// Slack message timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ts: Option<String>,
}

async fn slack_handoff(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<SlackHandoffRequest>,
) -> Result<(StatusCode, Json<SlackHandoffResponse>), ApiError> {
    let mut problems = Vec::new();
    let conversation_id = request.conversation_id.parse::<ConversationId>();
    if conversation_id.is_err() {
        problems.push("conversationId must be a UUID".to_string());
    }
    if request.brief.summary.trim().is_empty() {
        problems.push("brief.summary is required".to_string());
    }
    let Ok(conversation_id) = conversation_id else {
        return Err(ApiError::Validation(problems));
    };
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }

    let receipt = state
        .dispatcher()
        .dispatch(HandoffRequest {
            conversation_id,
            brief: request.brief,
            destination_channel: request.destination_channel,
        })
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SlackHandoffResponse {
            accepted: receipt.accepted,
            message_ts: receipt.external_ref,
        }),
    ))
}

async fn handoff_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HandoffStatus>, ApiError> {
    let id = conversation_id(&id)?;
    state
        .dispatcher()
        .status(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(id.to_string()))
}
