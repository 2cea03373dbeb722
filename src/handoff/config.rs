//! Configuration for handoff delivery.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handoff::retry::RetryPolicy;

/// Handoff delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Slack collaborator settings.
    pub slack: SlackConfig,
    /// Retry policy for each handoff.
    pub retry: RetryPolicy,
    /// Maximum queued handoffs waiting for the worker.
    pub queue_capacity: usize,
    /// Maximum handoffs delivered at the same time.
    pub concurrency: usize,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig::default(),
            retry: RetryPolicy::default(),
            queue_capacity: 256,
            concurrency: 4,
        }
    }
}

/// Slack credentials and endpoints.
///
/// With a bot token, briefs go through `chat.postMessage` and the message
/// timestamp is returned as the external reference. With only a webhook
/// URL, briefs go to the webhook's fixed channel.
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-…`).
    pub bot_token: Option<String>,
    /// Incoming webhook URL.
    pub webhook_url: Option<String>,
    /// Channel used when a request names none.
    pub default_channel: String,
    /// Base URL of the Web API.
    pub api_base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl SlackConfig {
    /// Whether any Slack credential is present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.bot_token.is_some() || self.webhook_url.is_some()
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            webhook_url: None,
            default_channel: "#intake".to_string(),
            api_base_url: "https://slack.com/api".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<redacted>"))
            .field("default_channel", &self.default_channel)
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
