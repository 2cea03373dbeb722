//! Handoff requests, outcomes and per-conversation status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::core::ids::ConversationId;
use crate::conversation::core::model::IntakeBrief;

/// A brief to deliver to a human-facing channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    /// Conversation the brief was derived from.
    pub conversation_id: ConversationId,
    /// The brief itself.
    pub brief: IntakeBrief,
    /// Channel override; the notifier's default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_channel: Option<String>,
}

/// What the notifier reported for a single delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collaborator accepted the brief.
    Delivered {
        /// Collaborator-side reference (Slack message timestamp).
        external_ref: Option<String>,
    },
    /// The collaborator refused the brief for good (e.g. unknown channel).
    Rejected {
        /// Machine-readable reason.
        reason: String,
    },
}

/// Result of a dispatch that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Whether the brief was (or already had been) delivered.
    pub accepted: bool,
    /// Collaborator-side reference.
    pub external_ref: Option<String>,
    /// Attempts spent by this dispatch; zero when nothing was sent.
    pub attempts: u32,
}

/// Recorded handoff state of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HandoffStatus {
    /// Waiting in the work queue.
    Queued {
        /// When it was enqueued.
        queued_at: DateTime<Utc>,
    },
    /// A delivery is in progress.
    Sending {
        /// When the current delivery started.
        started_at: DateTime<Utc>,
    },
    /// Delivered; never sent again.
    Delivered {
        /// Collaborator-side reference.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_ref: Option<String>,
        /// Attempts it took.
        attempts: u32,
        /// Delivery time.
        delivered_at: DateTime<Utc>,
    },
    /// Permanently refused by the collaborator.
    Rejected {
        /// Machine-readable reason.
        reason: String,
    },
    /// Gave up after retrying.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Error reported by the last attempt.
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let status = HandoffStatus::Failed {
            attempts: 5,
            last_error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["attempts"], 5);
        assert_eq!(json["lastError"], "timeout");
    }
}
