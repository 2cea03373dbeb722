//! Retrying, idempotent handoff dispatch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::conversation::core::ids::ConversationId;
use crate::handoff::error::{HandoffError, HandoffResult};
use crate::handoff::ledger::{Claim, HandoffLedger};
use crate::handoff::notifier::HandoffNotifier;
use crate::handoff::retry::RetryPolicy;
use crate::handoff::types::{DeliveryOutcome, DispatchReceipt, HandoffRequest, HandoffStatus};

/// Sends briefs through a notifier, retrying transient failures and
/// recording every outcome in the ledger.
pub struct HandoffDispatcher {
    notifier: Arc<dyn HandoffNotifier>,
    retry: RetryPolicy,
    ledger: Arc<HandoffLedger>,
}

impl HandoffDispatcher {
    /// Create a dispatcher with a fresh ledger.
    #[must_use]
    pub fn new(notifier: Arc<dyn HandoffNotifier>, retry: RetryPolicy) -> Self {
        Self {
            notifier,
            retry,
            ledger: Arc::new(HandoffLedger::new()),
        }
    }

    /// Shared ledger of handoff states.
    #[must_use]
    pub fn ledger(&self) -> &Arc<HandoffLedger> {
        &self.ledger
    }

    /// Recorded state of a conversation's handoff.
    #[must_use]
    pub fn status(&self, id: ConversationId) -> Option<HandoffStatus> {
        self.ledger.get(id)
    }

    /// Deliver a brief.
    ///
    /// A conversation that was already delivered is not sent again; the
    /// recorded reference is returned instead. While another dispatch for
    /// the same conversation is sending, this one waits for its outcome and
    /// then claims again. A permanent refusal yields `accepted = false`.
    ///
    /// # Errors
    /// Returns [`HandoffError::Exhausted`] when every attempt failed
    /// transiently, or the notifier's error when it is not retryable.
    pub async fn dispatch(&self, request: HandoffRequest) -> HandoffResult<DispatchReceipt> {
        let id = request.conversation_id;
        loop {
            let settled = self.ledger.settled();
            tokio::pin!(settled);
            settled.as_mut().enable();
            match self.ledger.claim(id) {
                Claim::Claimed => break,
                Claim::AlreadyDelivered(external_ref) => {
                    info!(conversation_id = %id, "Handoff already delivered; not sending again");
                    return Ok(DispatchReceipt {
                        accepted: true,
                        external_ref,
                        attempts: 0,
                    });
                }
                Claim::InProgress => {
                    debug!(conversation_id = %id, "Handoff in progress elsewhere; waiting");
                    settled.await;
                }
            }
        }
        let mut claim = self.ledger.hold(id);

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.notifier.deliver(&request).await {
                Ok(DeliveryOutcome::Delivered { external_ref }) => {
                    info!(
                        conversation_id = %id,
                        notifier = self.notifier.name(),
                        attempt,
                        external_ref = external_ref.as_deref().unwrap_or(""),
                        "Handoff delivered"
                    );
                    claim.record(HandoffStatus::Delivered {
                        external_ref: external_ref.clone(),
                        attempts: attempt,
                        delivered_at: Utc::now(),
                    });
                    return Ok(DispatchReceipt {
                        accepted: true,
                        external_ref,
                        attempts: attempt,
                    });
                }
                Ok(DeliveryOutcome::Rejected { reason }) => {
                    warn!(
                        conversation_id = %id,
                        notifier = self.notifier.name(),
                        %reason,
                        "Handoff rejected"
                    );
                    claim.record(HandoffStatus::Rejected { reason });
                    return Ok(DispatchReceipt {
                        accepted: false,
                        external_ref: None,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = err.retry_delay().map_or_else(
                        || self.retry.delay_for(attempt),
                        |hint| hint.min(self.retry.max_delay()),
                    );
                    warn!(
                        conversation_id = %id,
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %err,
                        "Handoff attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let last_error = err.to_string();
                    warn!(conversation_id = %id, attempt, error = %last_error, "Handoff failed");
                    claim.record(HandoffStatus::Failed {
                        attempts: attempt,
                        last_error: last_error.clone(),
                    });
                    if err.is_retryable() {
                        return Err(HandoffError::Exhausted {
                            attempts: attempt,
                            last_error,
                        });
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversation::core::model::IntakeBrief;
    use crate::handoff::notifier::NotifyFuture;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Notifier replaying a fixed script of results, then delivering.
    pub(crate) struct ScriptedNotifier {
        script: Mutex<Vec<HandoffResult<DeliveryOutcome>>>,
        latency: Duration,
        pub(crate) calls: AtomicU32,
    }

    impl ScriptedNotifier {
        pub(crate) fn new(mut script: Vec<HandoffResult<DeliveryOutcome>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                latency: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn delivering() -> Self {
            Self::new(Vec::new())
        }

        /// Every call sleeps for `latency` before answering.
        pub(crate) fn slow(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    impl HandoffNotifier for ScriptedNotifier {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn deliver<'a>(
            &'a self,
            _request: &'a HandoffRequest,
        ) -> NotifyFuture<'a, HandoffResult<DeliveryOutcome>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                let next = self.script.lock().unwrap().pop();
                next.unwrap_or_else(|| {
                    Ok(DeliveryOutcome::Delivered {
                        external_ref: Some(format!("ts-{call}")),
                    })
                })
            })
        }
    }

    fn request() -> HandoffRequest {
        HandoffRequest {
            conversation_id: ConversationId::new(),
            brief: IntakeBrief {
                summary: "summary".to_string(),
                ..IntakeBrief::default()
            },
            destination_channel: None,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![
            Err(HandoffError::Transient("503".to_string())),
            Err(HandoffError::Transient("503".to_string())),
        ]));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(5));
        let request = request();
        let id = request.conversation_id;

        let receipt = dispatcher.dispatch(request).await.unwrap();

        assert!(receipt.accepted);
        assert_eq!(receipt.attempts, 3);
        assert_eq!(receipt.external_ref.as_deref(), Some("ts-3"));
        assert!(matches!(
            dispatcher.status(id),
            Some(HandoffStatus::Delivered { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported_and_recorded() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![
            Err(HandoffError::Transient("a".to_string())),
            Err(HandoffError::Transient("b".to_string())),
        ]));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(2));
        let request = request();
        let id = request.conversation_id;

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, HandoffError::Exhausted { attempts: 2, .. }));
        assert!(err.is_retryable());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            dispatcher.status(id),
            Some(HandoffStatus::Failed { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_not_an_error() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![Ok(DeliveryOutcome::Rejected {
            reason: "invalid_channel".to_string(),
        })]));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(5));

        let receipt = dispatcher.dispatch(request()).await.unwrap();

        assert!(!receipt.accepted);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![Err(HandoffError::Config(
            "bad".to_string(),
        ))]));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(5));

        let err = dispatcher.dispatch(request()).await.unwrap_err();

        assert!(matches!(err, HandoffError::Config(_)));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delivered_conversation_is_sent_once() {
        let notifier = Arc::new(ScriptedNotifier::delivering());
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(3));
        let request = request();

        let first = dispatcher.dispatch(request.clone()).await.unwrap();
        let second = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.external_ref, second.external_ref);
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_sends_once() {
        let notifier = Arc::new(ScriptedNotifier::delivering().slow(Duration::from_millis(50)));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(3));
        let request = request();

        let (first, second) = tokio::join!(
            dispatcher.dispatch(request.clone()),
            dispatcher.dispatch(request)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert!(first.accepted && second.accepted);
        assert_eq!(first.external_ref.as_deref(), Some("ts-1"));
        assert_eq!(second.external_ref, first.external_ref);
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn test_waiting_dispatch_sends_after_a_rejection() {
        let notifier = Arc::new(
            ScriptedNotifier::new(vec![Ok(DeliveryOutcome::Rejected {
                reason: "channel_not_found".to_string(),
            })])
            .slow(Duration::from_millis(50)),
        );
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(3));
        let request = request();
        let id = request.conversation_id;

        let (first, second) = tokio::join!(
            dispatcher.dispatch(request.clone()),
            dispatcher.dispatch(request)
        );

        assert!(!first.unwrap().accepted);
        let second = second.unwrap();
        assert!(second.accepted);
        assert_eq!(second.attempts, 1);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            dispatcher.status(id),
            Some(HandoffStatus::Delivered { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_releases_its_claim() {
        let notifier = Arc::new(ScriptedNotifier::delivering().slow(Duration::from_secs(60)));
        let dispatcher = HandoffDispatcher::new(notifier.clone(), RetryPolicy::immediate(1));
        let request = request();
        let id = request.conversation_id;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), dispatcher.dispatch(request)).await;

        assert!(cancelled.is_err());
        assert_eq!(dispatcher.status(id), None);
    }

    #[tokio::test]
    async fn test_retry_after_hint_is_capped() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![Err(HandoffError::RateLimited(
            3600,
        ))]));
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
            jitter: false,
        };
        let dispatcher = HandoffDispatcher::new(notifier.clone(), retry);

        let receipt = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(request()))
            .await
            .expect("Retry-After hint must be capped by max_backoff_ms")
            .unwrap();

        assert!(receipt.accepted);
        assert_eq!(receipt.attempts, 2);
    }
}
