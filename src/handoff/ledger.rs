//! Per-conversation handoff bookkeeping.
//!
//! The ledger is what makes delivery at-most-once per conversation: a
//! dispatch must [`claim`](HandoffLedger::claim) the conversation before
//! sending, and a delivered conversation can never be claimed again.
//! A dispatch that finds the conversation [`Claim::InProgress`] waits on
//! [`HandoffLedger::settled`] and claims again.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::conversation::core::ids::ConversationId;
use crate::handoff::types::HandoffStatus;

/// Result of trying to claim a conversation for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the delivery.
    Claimed,
    /// Delivered earlier; carries the recorded reference.
    AlreadyDelivered(Option<String>),
    /// Another dispatch is sending right now.
    InProgress,
}

/// Concurrent map of handoff states keyed by conversation.
#[derive(Debug, Default)]
pub struct HandoffLedger {
    entries: DashMap<ConversationId, HandoffStatus>,
    settled: Notify,
}

/// Owned claim on a conversation. Dropped before an outcome is recorded
/// through it, it releases the conversation and wakes waiters.
#[must_use = "dropping the guard releases the claim"]
pub struct ClaimGuard<'a> {
    ledger: &'a HandoffLedger,
    id: ConversationId,
    settled: bool,
}

impl ClaimGuard<'_> {
    /// Record the outcome of the claimed dispatch.
    pub fn record(&mut self, status: HandoffStatus) {
        self.ledger.record(self.id, status);
        self.settled = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let abandoned = self
            .ledger
            .entries
            .remove_if(&self.id, |_, status| {
                matches!(status, HandoffStatus::Sending { .. })
            })
            .is_some();
        if abandoned {
            self.ledger.settled.notify_waiters();
        }
    }
}

impl HandoffLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a conversation's handoff.
    #[must_use]
    pub fn get(&self, id: ConversationId) -> Option<HandoffStatus> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Atomically move the conversation into `sending` unless it is already
    /// delivered or being sent.
    pub fn claim(&self, id: ConversationId) -> Claim {
        let sending = HandoffStatus::Sending {
            started_at: Utc::now(),
        };
        match self.entries.entry(id) {
            Entry::Occupied(mut entry) => {
                let blocked = match entry.get() {
                    HandoffStatus::Delivered { external_ref, .. } => {
                        Some(Claim::AlreadyDelivered(external_ref.clone()))
                    }
                    HandoffStatus::Sending { .. } => Some(Claim::InProgress),
                    _ => None,
                };
                if let Some(claim) = blocked {
                    return claim;
                }
                entry.insert(sending);
                Claim::Claimed
            }
            Entry::Vacant(entry) => {
                entry.insert(sending);
                Claim::Claimed
            }
        }
    }

    /// Guard over the claim just taken for `id`.
    pub const fn hold(&self, id: ConversationId) -> ClaimGuard<'_> {
        ClaimGuard {
            ledger: self,
            id,
            settled: false,
        }
    }

    /// Completes at the next [`record`](Self::record). Enable it before
    /// calling [`claim`](Self::claim) so no outcome slips in between.
    pub fn settled(&self) -> Notified<'_> {
        self.settled.notified()
    }

    /// Record a queued handoff. Delivered or in-flight entries are left alone.
    pub fn mark_queued(&self, id: ConversationId) {
        self.set_unless_active(
            id,
            HandoffStatus::Queued {
                queued_at: Utc::now(),
            },
        );
    }

    /// Record that a handoff never reached the queue. Delivered or
    /// in-flight entries are left alone.
    pub fn mark_unqueued(&self, id: ConversationId, last_error: String) {
        self.set_unless_active(
            id,
            HandoffStatus::Failed {
                attempts: 0,
                last_error,
            },
        );
    }

    /// Record the outcome of a dispatch and wake dispatches waiting on it.
    pub fn record(&self, id: ConversationId, status: HandoffStatus) {
        self.entries.insert(id, status);
        self.settled.notify_waiters();
    }

    fn set_unless_active(&self, id: ConversationId, status: HandoffStatus) {
        match self.entries.entry(id) {
            Entry::Occupied(mut entry) => {
                if !matches!(
                    entry.get(),
                    HandoffStatus::Delivered { .. } | HandoffStatus::Sending { .. }
                ) {
                    entry.insert(status);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(status);
            }
        }
    }
}
