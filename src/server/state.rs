//! Application state shared across all request handlers.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::conversation::{
    BriefConfig, BriefSummarizer, ConversationError, ConversationManager, ConversationStore,
    InMemoryConversationStore, SqliteConversationStore,
};
use crate::handoff::{
    HandoffDispatcher, HandoffError, HandoffNotifier, HandoffQueue, HandoffWorker, LogNotifier,
    SlackNotifier,
};
use crate::uploads::{PresignError, UploadPresigner};

/// Failures while assembling the state.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be opened.
    #[error("storage: {0}")]
    Storage(#[from] ConversationError),

    /// Upload signing could not be set up.
    #[error("uploads: {0}")]
    Uploads(#[from] PresignError),

    /// The notifier could not be built.
    #[error("handoff: {0}")]
    Handoff(#[from] HandoffError),

    /// A brief pattern failed to compile.
    #[error("brief patterns: {0}")]
    Brief(#[from] regex::Error),
}

/// Shared application state.
pub struct AppState {
    /// Conversation lifecycle.
    pub manager: ConversationManager,
    /// Upload link issuer.
    pub presigner: UploadPresigner,
}

impl AppState {
    /// Build the state described by `config`.
    ///
    /// Conversations live in `SQLite` when a path is configured, in memory
    /// otherwise. Briefs go to Slack when credentials are present and to the
    /// log otherwise. The returned worker must be spawned for queued handoffs
    /// to be delivered.
    ///
    /// # Errors
    /// Returns a [`StartupError`] if any component cannot be built.
    pub async fn build(config: &AppConfig) -> Result<(Arc<Self>, HandoffWorker), StartupError> {
        config.validate()?;

        let store: Arc<dyn ConversationStore> = match &config.storage.sqlite_path {
            Some(path) => {
                info!(%path, "Using SQLite conversation store");
                Arc::new(SqliteConversationStore::open(path).await?)
            }
            None => {
                warn!("No SQLite path configured; conversations are kept in memory only");
                Arc::new(InMemoryConversationStore::new())
            }
        };

        let notifier: Arc<dyn HandoffNotifier> = if config.handoff.slack.is_configured() {
            info!(
                channel = %config.handoff.slack.default_channel,
                "Delivering handoffs to Slack"
            );
            Arc::new(SlackNotifier::new(&config.handoff.slack)?)
        } else {
            warn!("Slack is not configured; handoff briefs are only logged");
            Arc::new(LogNotifier)
        };

        Self::from_parts(config, store, notifier)
    }

    /// Assemble the state around an existing store and notifier.
    ///
    /// # Errors
    /// Returns a [`StartupError`] if upload signing or brief patterns cannot
    /// be set up.
    pub fn from_parts(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        notifier: Arc<dyn HandoffNotifier>,
    ) -> Result<(Arc<Self>, HandoffWorker), StartupError> {
        let secret = match &config.uploads.signing_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                warn!("No upload signing secret configured; links will not survive a restart");
                let mut bytes = [0_u8; 32];
                rand::thread_rng().fill(&mut bytes);
                bytes.to_vec()
            }
        };
        let presigner = UploadPresigner::new(&config.uploads, &secret)?;

        let dispatcher = Arc::new(HandoffDispatcher::new(notifier, config.handoff.retry.clone()));
        let (queue, worker) = HandoffQueue::new(
            dispatcher,
            config.handoff.queue_capacity,
            config.handoff.concurrency,
        );
        let manager = ConversationManager::new(
            store,
            BriefSummarizer::new(BriefConfig::default())?,
            queue,
        );

        Ok((Arc::new(Self { manager, presigner }), worker))
    }

    /// Dispatcher shared by the queue and the direct handoff endpoint.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<HandoffDispatcher> {
        self.manager.handoff().dispatcher()
    }
}
