//! Notification collaborator abstraction.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use crate::handoff::error::HandoffResult;
use crate::handoff::types::{DeliveryOutcome, HandoffRequest};

/// Boxed future type for notifier operations.
pub type NotifyFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Delivers intake briefs to a human-facing channel.
///
/// A single call is one attempt; retrying is the dispatcher's job. Return
/// `Ok(DeliveryOutcome::Rejected)` for permanent refusals and a retryable
/// [`HandoffError`](crate::handoff::HandoffError) for transient ones.
pub trait HandoffNotifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Make one delivery attempt.
    ///
    /// # Errors
    /// Returns an error if the attempt failed in a way that may succeed later.
    fn deliver<'a>(
        &'a self,
        request: &'a HandoffRequest,
    ) -> NotifyFuture<'a, HandoffResult<DeliveryOutcome>>;
}

/// Notifier that only writes the brief to the log.
///
/// Used when no Slack credentials are configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl HandoffNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver<'a>(
        &'a self,
        request: &'a HandoffRequest,
    ) -> NotifyFuture<'a, HandoffResult<DeliveryOutcome>> {
        Box::pin(async move {
            info!(
                conversation_id = %request.conversation_id,
                channel = request.destination_channel.as_deref().unwrap_or("default"),
                summary = %request.brief.summary,
                "Handoff brief (no Slack configured)"
            );
            Ok(DeliveryOutcome::Delivered { external_ref: None })
        })
    }
}
