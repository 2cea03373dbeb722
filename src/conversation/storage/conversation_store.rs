//! Keyed conversation store abstraction and its in-memory implementation.

use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;

use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::ConversationId;
use crate::conversation::core::model::{AuditEntry, Conversation, Message};

/// Boxed future type for conversation store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Conversation store trait.
///
/// Callers serialize mutations per conversation; implementations only need
/// to be safe under concurrent access to different keys.
pub trait ConversationStore: Send + Sync {
    /// Load a conversation with all of its messages.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Option<Conversation>>>;

    /// Insert or replace a conversation. Messages already stored are kept,
    /// new ones are added.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn put(&self, conversation: Conversation) -> StoreFuture<'_, ConversationResult<()>>;

    /// Append a message and bump the owner's `updated_at`.
    ///
    /// # Errors
    /// Returns [`ConversationError::NotFound`] if the owner is unknown, or an
    /// error if storage access fails.
    fn append_message(&self, message: Message) -> StoreFuture<'_, ConversationResult<()>>;

    /// Append an entry to a conversation's audit trail.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_audit(&self, entry: AuditEntry) -> StoreFuture<'_, ConversationResult<()>>;

    /// Audit trail of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn audit_log(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Vec<AuditEntry>>>;
}

/// Process-local store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<ConversationId, Conversation>,
    audit: DashMap<ConversationId, Vec<AuditEntry>>,
}

impl InMemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store holds no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Option<Conversation>>> {
        Box::pin(async move { Ok(self.conversations.get(&id).map(|entry| entry.value().clone())) })
    }

    fn put(&self, conversation: Conversation) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            self.conversations.insert(conversation.id, conversation);
            Ok(())
        })
    }

    fn append_message(&self, message: Message) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let Some(mut entry) = self.conversations.get_mut(&message.conversation_id) else {
                return Err(ConversationError::NotFound(message.conversation_id));
            };
            entry.updated_at = message.created_at;
            entry.messages.push(message);
            Ok(())
        })
    }

    fn append_audit(&self, entry: AuditEntry) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            self.audit.entry(entry.conversation_id).or_default().push(entry);
            Ok(())
        })
    }

    fn audit_log(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Vec<AuditEntry>>> {
        Box::pin(async move {
            Ok(self
                .audit
                .get(&id)
                .map(|entries| entries.value().clone())
                .unwrap_or_default())
        })
    }
}
