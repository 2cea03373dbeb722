//! Conversation lifecycle manager.
//!
//! Owns the rules around a conversation: who may create one, when messages
//! may be appended, and what happens exactly once when it ends. Mutations of
//! a single conversation are serialized through a per-id async mutex; there
//! is no locking across conversations.
//!
//! Timestamps are taken at millisecond precision, the precision the stores
//! keep, so a record reads back equal to what was returned.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::conversation::brief::BriefSummarizer;
use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::ConversationId;
use crate::conversation::core::model::{
    Attachment, AuditAction, AuditEntry, Conversation, Message, MessageRole,
};
use crate::conversation::storage::ConversationStore;
use crate::handoff::{HandoffQueue, HandoffRequest};

/// Input for [`ConversationManager::create`].
#[derive(Clone, Debug, Default)]
pub struct NewConversation {
    /// Participant display name.
    pub participant_name: String,
    /// Participant email.
    pub participant_email: String,
    /// Optional first message from the participant.
    pub initial_message: Option<String>,
}

/// Input for [`ConversationManager::append_message`].
#[derive(Clone, Debug, Default)]
pub struct NewMessage {
    /// Author; defaults to the participant.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Attached files.
    pub attachments: Vec<Attachment>,
}

/// Result of [`ConversationManager::end_conversation`].
#[derive(Clone, Debug)]
pub struct EndOutcome {
    /// Conversation after the call.
    pub conversation: Conversation,
    /// Whether this call queued a handoff.
    pub handoff_queued: bool,
}

/// Coordinates conversation state, brief synthesis and handoff queueing.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    summarizer: BriefSummarizer,
    handoff: HandoffQueue,
    locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl ConversationManager {
    /// Create a manager over the given store.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        summarizer: BriefSummarizer,
        handoff: HandoffQueue,
    ) -> Self {
        Self {
            store,
            summarizer,
            handoff,
            locks: DashMap::new(),
        }
    }

    /// Queue used for handoffs.
    #[must_use]
    pub fn handoff(&self) -> &HandoffQueue {
        &self.handoff
    }

    /// Start a new conversation.
    ///
    /// # Errors
    /// Returns [`ConversationError::Validation`] when neither a name nor an
    /// email is given or the email is malformed, or a storage error.
    pub async fn create(&self, input: NewConversation) -> ConversationResult<Conversation> {
        let name = non_blank(input.participant_name);
        let email = non_blank(input.participant_email);

        let mut problems = Vec::new();
        if name.is_none() && email.is_none() {
            problems.push("participantName or participantEmail is required".to_string());
        }
        if let Some(email) = &email {
            if !looks_like_email(email) {
                problems.push("participantEmail must be an email address".to_string());
            }
        }
        if !problems.is_empty() {
            return Err(ConversationError::Validation(problems));
        }

        let now = now();
        let mut conversation = Conversation::new(name, email, now);
        if let Some(text) = input.initial_message.and_then(non_blank) {
            let first = conversation.next_message(MessageRole::User, text, Vec::new(), now);
            conversation.messages.push(first);
        }

        self.store.put(conversation.clone()).await?;
        self.audit(
            conversation.id,
            AuditAction::Created,
            serde_json::json!({ "messages": conversation.messages.len() }),
        )
        .await;
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Conversation created"
        );
        Ok(conversation)
    }

    /// Load a conversation.
    ///
    /// # Errors
    /// Returns [`ConversationError::NotFound`] for unknown ids, or a storage
    /// error.
    pub async fn get(&self, id: ConversationId) -> ConversationResult<Conversation> {
        self.store
            .get(id)
            .await?
            .ok_or(ConversationError::NotFound(id))
    }

    /// Append a message, keeping arrival order.
    ///
    /// # Errors
    /// Returns [`ConversationError::Validation`] for an empty message,
    /// [`ConversationError::NotFound`] for unknown ids,
    /// [`ConversationError::ConversationClosed`] once the conversation has
    /// ended, or a storage error.
    pub async fn append_message(
        &self,
        id: ConversationId,
        input: NewMessage,
    ) -> ConversationResult<Message> {
        let content = input.content.trim().to_string();
        let mut problems = Vec::new();
        if content.is_empty() && input.attachments.is_empty() {
            problems.push("content or attachments is required".to_string());
        }
        for (index, attachment) in input.attachments.iter().enumerate() {
            if attachment.file_url.trim().is_empty() {
                problems.push(format!("attachments[{index}].fileUrl is required"));
            }
        }
        if !problems.is_empty() {
            return Err(ConversationError::Validation(problems));
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(conversation) = self.store.get(id).await? else {
            self.release(id);
            return Err(ConversationError::NotFound(id));
        };
        if conversation.is_ended() {
            self.release(id);
            return Err(ConversationError::ConversationClosed(id));
        }

        let message = conversation.next_message(input.role, content, input.attachments, now());
        self.store.append_message(message.clone()).await?;
        debug!(
            conversation_id = %id,
            sequence = message.sequence,
            role = %message.role,
            "Message appended"
        );
        Ok(message)
    }

    /// End a conversation, derive its brief and queue the handoff.
    ///
    /// Ending an already ended conversation changes nothing and reports
    /// `handoff_queued = false`.
    ///
    /// # Errors
    /// Returns [`ConversationError::NotFound`] for unknown ids, or a storage
    /// error.
    pub async fn end_conversation(
        &self,
        id: ConversationId,
        notes: Option<String>,
    ) -> ConversationResult<EndOutcome> {
        let notes = notes.and_then(non_blank);

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut conversation) = self.store.get(id).await? else {
            self.release(id);
            return Err(ConversationError::NotFound(id));
        };
        if conversation.is_ended() {
            self.release(id);
            debug!(conversation_id = %id, "Conversation already ended");
            return Ok(EndOutcome {
                conversation,
                handoff_queued: false,
            });
        }

        let brief = self.summarizer.summarize(&conversation, notes.as_deref());
        conversation.end(brief.clone(), notes, now());
        self.store.put(conversation.clone()).await?;
        self.release(id);

        let handoff_queued = match self.handoff.enqueue(HandoffRequest {
            conversation_id: id,
            brief,
            destination_channel: None,
        }) {
            Ok(()) => true,
            Err(err) => {
                warn!(conversation_id = %id, error = %err, "Conversation ended without a queued handoff");
                false
            }
        };

        self.audit(
            id,
            AuditAction::Ended,
            serde_json::json!({
                "messages": conversation.messages.len(),
                "handoffQueued": handoff_queued,
            }),
        )
        .await;
        info!(
            conversation_id = %id,
            messages = conversation.messages.len(),
            handoff_queued,
            "Conversation ended"
        );
        Ok(EndOutcome {
            conversation,
            handoff_queued,
        })
    }

    /// Audit trail of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns [`ConversationError::NotFound`] for unknown ids, or a storage
    /// error.
    pub async fn audit_log(&self, id: ConversationId) -> ConversationResult<Vec<AuditEntry>> {
        if self.store.get(id).await?.is_none() {
            return Err(ConversationError::NotFound(id));
        }
        self.store.audit_log(id).await
    }

    /// Append to the audit trail. A failed write is logged; the
    /// conversation record stays authoritative.
    async fn audit(&self, id: ConversationId, action: AuditAction, details: serde_json::Value) {
        let entry = AuditEntry {
            conversation_id: id,
            action,
            details,
            recorded_at: now(),
        };
        if let Err(err) = self.store.append_audit(entry).await {
            error!(conversation_id = %id, %action, error = %err, "Failed to write audit entry");
        }
    }

    fn lock_for(&self, id: ConversationId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Forget the lock of a conversation that can no longer change.
    fn release(&self, id: ConversationId) {
        self.locks.remove(&id);
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::brief::BriefConfig;
    use crate::conversation::core::model::ConversationStatus;
    use crate::conversation::storage::{InMemoryConversationStore, SqliteConversationStore};
    use crate::handoff::dispatcher::tests::ScriptedNotifier;
    use crate::handoff::{HandoffDispatcher, HandoffStatus, HandoffWorker, RetryPolicy};

    fn manager_over(
        store: Arc<dyn ConversationStore>,
        capacity: usize,
    ) -> (Arc<ConversationManager>, HandoffWorker) {
        let dispatcher = Arc::new(HandoffDispatcher::new(
            Arc::new(ScriptedNotifier::delivering()),
            RetryPolicy::immediate(1),
        ));
        let (queue, worker) = HandoffQueue::new(dispatcher, capacity, 1);
        let manager = ConversationManager::new(
            store,
            BriefSummarizer::new(BriefConfig::default()).unwrap(),
            queue,
        );
        (Arc::new(manager), worker)
    }

    fn manager_with_capacity(capacity: usize) -> (Arc<ConversationManager>, HandoffWorker) {
        manager_over(Arc::new(InMemoryConversationStore::new()), capacity)
    }

    fn alice(initial: Option<&str>) -> NewConversation {
        NewConversation {
            participant_name: "Alice".to_string(),
            participant_email: "a@x.com".to_string(),
            initial_message: initial.map(ToString::to_string),
        }
    }

    fn text(content: &str) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            ..NewMessage::default()
        }
    }

    #[tokio::test]
    async fn test_create_end_end_scenario() {
        let (manager, _worker) = manager_with_capacity(8);

        let conversation = manager.create(alice(Some("Hi"))).await.unwrap();
        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "Hi");
        assert_eq!(conversation.messages[0].sequence, 1);

        let first = manager.end_conversation(conversation.id, None).await.unwrap();
        assert_eq!(first.conversation.status, ConversationStatus::Ended);
        assert!(first.handoff_queued);
        assert!(first.conversation.intake_brief.is_some());

        let second = manager
            .end_conversation(conversation.id, Some("late notes".to_string()))
            .await
            .unwrap();
        assert!(!second.handoff_queued);
        assert_eq!(second.conversation.status, ConversationStatus::Ended);
        assert_eq!(second.conversation.notes, None);
        assert_eq!(second.conversation.ended_at, first.conversation.ended_at);

        let status = manager.handoff().dispatcher().status(conversation.id);
        assert!(matches!(status, Some(HandoffStatus::Queued { .. })));
    }

    #[tokio::test]
    async fn test_creating_twice_gives_distinct_ids() {
        let (manager, _worker) = manager_with_capacity(8);
        let a = manager.create(alice(None)).await.unwrap();
        let b = manager.create(alice(None)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (manager, _worker) = manager_with_capacity(8);

        let err = manager
            .create(NewConversation {
                participant_name: "  ".to_string(),
                ..NewConversation::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));

        let err = manager
            .create(NewConversation {
                participant_email: "not-an-email".to_string(),
                ..NewConversation::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(ref p) if p.len() == 1));

        let only_email = manager
            .create(NewConversation {
                participant_email: "bob@example.org".to_string(),
                ..NewConversation::default()
            })
            .await
            .unwrap();
        assert_eq!(only_email.participant_name, None);
    }

    #[tokio::test]
    async fn test_messages_read_back_in_append_order() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(Some("first"))).await.unwrap();

        for content in ["second", "third", "fourth"] {
            manager.append_message(conversation.id, text(content)).await.unwrap();
        }

        let loaded = manager.get(conversation.id).await.unwrap();
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third", "fourth"]);
        let sequences: Vec<u64> = loaded.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_append_after_end_is_closed() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(None)).await.unwrap();
        manager.end_conversation(conversation.id, None).await.unwrap();

        let err = manager
            .append_message(conversation.id, text("too late"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::ConversationClosed(id) if id == conversation.id));
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let (manager, _worker) = manager_with_capacity(8);
        let id = ConversationId::new();

        assert!(matches!(
            manager.append_message(id, text("hello")).await,
            Err(ConversationError::NotFound(_))
        ));
        assert!(matches!(
            manager.end_conversation(id, None).await,
            Err(ConversationError::NotFound(_))
        ));
        assert!(matches!(manager.get(id).await, Err(ConversationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(None)).await.unwrap();

        let err = manager
            .append_message(conversation.id, text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));

        let attachment_only = manager
            .append_message(
                conversation.id,
                NewMessage {
                    attachments: vec![Attachment {
                        file_url: "https://cdn.example.com/uploads/a.png".to_string(),
                        ..Attachment::default()
                    }],
                    ..NewMessage::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(attachment_only.content, "");
        assert_eq!(attachment_only.attachments.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_unique_sequences() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(None)).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..32 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .append_message(conversation.id, text(&format!("message {n}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = manager.get(conversation.id).await.unwrap();
        let sequences: Vec<u64> = loaded.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, (1..=32).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_ends_queue_one_handoff() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(Some("We need a new logo"))).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.end_conversation(conversation.id, None).await
            }));
        }
        let mut queued = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().handoff_queued {
                queued += 1;
            }
        }
        assert_eq!(queued, 1);

        let actions: Vec<AuditAction> = manager
            .audit_log(conversation.id)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Created, AuditAction::Ended]);
    }

    #[tokio::test]
    async fn test_audit_trail_records_create_and_first_end() {
        let (manager, _worker) = manager_with_capacity(8);
        let conversation = manager.create(alice(Some("Hi"))).await.unwrap();
        manager.append_message(conversation.id, text("More")).await.unwrap();
        manager.end_conversation(conversation.id, None).await.unwrap();
        manager.end_conversation(conversation.id, None).await.unwrap();

        let log = manager.audit_log(conversation.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, AuditAction::Created);
        assert_eq!(log[0].details["messages"], 1);
        assert_eq!(log[1].action, AuditAction::Ended);
        assert_eq!(log[1].details["messages"], 2);
        assert_eq!(log[1].details["handoffQueued"], true);
        assert!(log[0].recorded_at <= log[1].recorded_at);

        assert!(matches!(
            manager.audit_log(ConversationId::new()).await,
            Err(ConversationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_backed_records_read_back_equal() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        let (manager, _worker) = manager_over(Arc::new(store), 8);

        let created = manager.create(alice(Some("Hi"))).await.unwrap();
        assert_eq!(manager.get(created.id).await.unwrap(), created);

        let message = manager.append_message(created.id, text("Budget is $8k")).await.unwrap();
        let loaded = manager.get(created.id).await.unwrap();
        assert_eq!(loaded.messages.last(), Some(&message));
        assert_eq!(loaded.updated_at, message.created_at);

        let first = manager.end_conversation(created.id, None).await.unwrap();
        let second = manager.end_conversation(created.id, None).await.unwrap();
        assert!(first.handoff_queued);
        assert!(!second.handoff_queued);
        assert_eq!(second.conversation, first.conversation);
    }

    #[tokio::test]
    async fn test_end_with_full_queue_still_ends() {
        let (manager, _worker) = manager_with_capacity(1);
        let first = manager.create(alice(None)).await.unwrap();
        let second = manager.create(alice(None)).await.unwrap();

        assert!(manager.end_conversation(first.id, None).await.unwrap().handoff_queued);
        let outcome = manager.end_conversation(second.id, None).await.unwrap();

        assert!(!outcome.handoff_queued);
        assert_eq!(outcome.conversation.status, ConversationStatus::Ended);
        assert!(matches!(
            manager.handoff().dispatcher().status(second.id),
            Some(HandoffStatus::Failed { .. })
        ));
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("a@x.com"));
        assert!(!looks_like_email("a@x"));
        assert!(!looks_like_email("@x.com"));
        assert!(!looks_like_email("a b@x.com"));
        assert!(!looks_like_email("a@@x.com"));
    }
}
