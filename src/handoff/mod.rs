//! Handoff of finished conversations to a human-facing channel.
//!
//! - [`HandoffNotifier`] abstracts the collaborator (Slack or log-only).
//! - [`HandoffDispatcher`] retries transient failures and keeps delivery
//!   at-most-once per conversation through the [`HandoffLedger`].
//! - [`HandoffQueue`] / [`HandoffWorker`] move dispatch off the request path.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod notifier;
pub mod queue;
pub mod retry;
pub mod slack;
pub mod types;

pub use config::{HandoffConfig, SlackConfig};
pub use dispatcher::HandoffDispatcher;
pub use error::{HandoffError, HandoffResult};
pub use ledger::{Claim, ClaimGuard, HandoffLedger};
pub use notifier::{HandoffNotifier, LogNotifier, NotifyFuture};
pub use queue::{HandoffQueue, HandoffTask, HandoffWorker, HandoffWorkerHandle};
pub use retry::RetryPolicy;
pub use slack::SlackNotifier;
pub use types::{DeliveryOutcome, DispatchReceipt, HandoffRequest, HandoffStatus};
