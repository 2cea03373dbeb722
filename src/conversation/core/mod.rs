//! Core conversation types and identifiers.

pub mod errors;
pub mod ids;
pub mod model;

pub use errors::{ConversationError, ConversationResult};
pub use ids::{ConversationId, MessageId, UploadToken};
pub use model::{
    Attachment, AuditAction, AuditEntry, Conversation, ConversationStatus, IntakeBrief, Message,
    MessageRole,
};
