//! Error types for the conversation subsystem.

use thiserror::Error;

use crate::conversation::core::ids::ConversationId;

/// Conversation subsystem error type.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Malformed or out-of-range input; one entry per violated rule.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// No conversation with this id exists.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
    /// The conversation has ended and no longer accepts mutations.
    #[error("conversation {0} has ended")]
    ConversationClosed(ConversationId),
    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;
