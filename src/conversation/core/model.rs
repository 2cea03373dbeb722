//! Conversation, message and intake brief records.
//!
//! These are plain data records serialized with camelCase field names. The
//! only behavior they carry is the one-way `active → ended` transition and
//! the sequencing of appended messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::core::ids::{ConversationId, MessageId};

/// Lifecycle state of a conversation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting new messages.
    #[default]
    Active,
    /// Closed; terminal.
    Ended,
}

impl ConversationStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            _ => Err(value.to_string()),
        }
    }
}

/// Author of a message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The participant.
    #[default]
    User,
    /// The intake agent.
    Agent,
    /// System-generated notice.
    System,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            _ => Err(value.to_string()),
        }
    }
}

/// Descriptor of an externally stored file. Only metadata, never bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Where the file can be fetched.
    pub file_url: String,
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Structured summary derived when a conversation ends.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeBrief {
    /// Free-text overview.
    pub summary: String,
    /// What the participant wants to achieve.
    #[serde(default)]
    pub goals: Vec<String>,
    /// Hard limits the participant mentioned.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Timing expectations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    /// Budget expectations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    /// Suggested follow-ups for whoever picks up the handoff.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_next_steps: Vec<String>,
}

/// A single immutable message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// 1-based position inside the conversation.
    pub sequence: u64,
    /// Author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An intake conversation with its messages in arrival order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Lifecycle state.
    pub status: ConversationStatus,
    /// Participant display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    /// Participant email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_email: Option<String>,
    /// Brief produced at end of conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intake_brief: Option<IntakeBrief>,
    /// Notes supplied when the conversation was ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Messages ordered by `sequence`.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// When the conversation ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Create an empty active conversation.
    #[must_use]
    pub fn new(
        participant_name: Option<String>,
        participant_email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::new(),
            status: ConversationStatus::Active,
            participant_name,
            participant_email,
            intake_brief: None,
            notes: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    /// Whether the conversation has reached its terminal state.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status == ConversationStatus::Ended
    }

    /// Sequence number the next appended message will receive.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.messages.last().map_or(1, |m| m.sequence + 1)
    }

    /// Build the next message for this conversation without storing it.
    #[must_use]
    pub fn next_message(
        &self,
        role: MessageRole,
        content: String,
        attachments: Vec<Attachment>,
        now: DateTime<Utc>,
    ) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: self.id,
            sequence: self.next_sequence(),
            role,
            content,
            attachments,
            created_at: now,
        }
    }

    /// Best available label for the participant.
    #[must_use]
    pub fn participant_label(&self) -> &str {
        self.participant_name
            .as_deref()
            .or(self.participant_email.as_deref())
            .unwrap_or("the participant")
    }

    /// Transition to `ended`. Returns `false` when already ended, leaving
    /// the record untouched.
    pub fn end(&mut self, brief: IntakeBrief, notes: Option<String>, now: DateTime<Utc>) -> bool {
        if self.is_ended() {
            return false;
        }
        self.status = ConversationStatus::Ended;
        self.intake_brief = Some(brief);
        self.notes = notes;
        self.ended_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// Lifecycle change recorded in a conversation's audit trail.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// The conversation was opened.
    Created,
    /// The conversation was ended and its brief derived.
    Ended,
}

impl AuditAction {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "ended" => Ok(Self::Ended),
            _ => Err(value.to_string()),
        }
    }
}

/// Append-only audit record. Entries are never updated or removed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Conversation the change applies to.
    pub conversation_id: ConversationId,
    /// What happened.
    pub action: AuditAction,
    /// Action-specific facts, such as message counts.
    pub details: serde_json::Value,
    /// When it happened.
    pub recorded_at: DateTime<Utc>,
}
