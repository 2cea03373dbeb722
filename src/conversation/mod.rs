//! Conversations: model, persistence, brief synthesis and lifecycle.

pub mod brief;
pub mod core;
pub mod manager;
pub mod storage;

pub use self::brief::{BriefConfig, BriefSummarizer};
pub use self::core::{
    Attachment, AuditAction, AuditEntry, Conversation, ConversationError, ConversationId,
    ConversationResult, ConversationStatus, IntakeBrief, Message, MessageId, MessageRole,
    UploadToken,
};
pub use self::manager::{ConversationManager, EndOutcome, NewConversation, NewMessage};
pub use self::storage::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
