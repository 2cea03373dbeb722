//! Slack delivery of intake briefs.

use std::fmt::Write as _;
use std::time::Duration;

use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handoff::config::SlackConfig;
use crate::handoff::error::{HandoffError, HandoffResult};
use crate::handoff::notifier::{HandoffNotifier, NotifyFuture};
use crate::handoff::types::{DeliveryOutcome, HandoffRequest};

/// Reason reported when a channel name cannot be valid.
pub const INVALID_CHANNEL: &str = "invalid_channel";

enum SlackTarget {
    Bot { token: String },
    Webhook { url: String },
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    mrkdwn: bool,
    unfurl_links: bool,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Notifier posting briefs to Slack.
pub struct SlackNotifier {
    client: Client,
    target: SlackTarget,
    api_base_url: String,
    default_channel: String,
    channel_pattern: Regex,
}

impl SlackNotifier {
    /// Build a notifier from configuration. The bot token wins over the
    /// webhook when both are set.
    ///
    /// # Errors
    /// Returns an error if no credential is configured or the HTTP client
    /// cannot be built.
    pub fn new(config: &SlackConfig) -> HandoffResult<Self> {
        let target = match (&config.bot_token, &config.webhook_url) {
            (Some(token), _) => SlackTarget::Bot {
                token: token.clone(),
            },
            (None, Some(url)) => SlackTarget::Webhook { url: url.clone() },
            (None, None) => {
                return Err(HandoffError::Config(
                    "slack needs a bot token or a webhook url".to_string(),
                ));
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let channel_pattern = Regex::new(r"^(#?[a-z0-9][a-z0-9._-]{0,79}|[CGD][A-Z0-9]{8,})$")
            .map_err(|err| HandoffError::Config(err.to_string()))?;

        Ok(Self {
            client,
            target,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            default_channel: config.default_channel.clone(),
            channel_pattern,
        })
    }

    fn resolve_channel<'a>(&'a self, request: &'a HandoffRequest) -> &'a str {
        request
            .destination_channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_channel)
    }

    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> HandoffResult<DeliveryOutcome> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base_url))
            .bearer_auth(token)
            .json(&PostMessage {
                channel,
                text,
                mrkdwn: true,
                unfurl_links: false,
            })
            .send()
            .await?;
        check_status(&response)?;

        let body: SlackApiResponse = response.json().await?;
        debug!(ok = body.ok, error = ?body.error, "Slack chat.postMessage response");
        if body.ok {
            return Ok(DeliveryOutcome::Delivered {
                external_ref: body.ts,
            });
        }
        outcome_for_api_error(body.error.unwrap_or_else(|| "unknown_error".to_string()))
    }

    async fn post_webhook(&self, url: &str, text: &str) -> HandoffResult<DeliveryOutcome> {
        let response = self
            .client
            .post(url)
            .json(&WebhookMessage { text })
            .send()
            .await?;
        check_status(&response)?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeliveryOutcome::Delivered { external_ref: None });
        }
        let body = response.text().await.unwrap_or_default();
        let reason = body.trim();
        Ok(DeliveryOutcome::Rejected {
            reason: if reason.is_empty() {
                format!("http_{}", status.as_u16())
            } else {
                reason.to_string()
            },
        })
    }
}

impl HandoffNotifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn deliver<'a>(
        &'a self,
        request: &'a HandoffRequest,
    ) -> NotifyFuture<'a, HandoffResult<DeliveryOutcome>> {
        Box::pin(async move {
            let channel = self.resolve_channel(request);
            if !self.channel_pattern.is_match(channel) {
                return Ok(DeliveryOutcome::Rejected {
                    reason: INVALID_CHANNEL.to_string(),
                });
            }

            let text = format_brief(request);
            match &self.target {
                SlackTarget::Bot { token } => self.post_message(token, channel, &text).await,
                SlackTarget::Webhook { url } => self.post_webhook(url, &text).await,
            }
        })
    }
}

/// Turn HTTP-level failures into retryable errors.
fn check_status(response: &Response) -> HandoffResult<()> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(1);
        return Err(HandoffError::RateLimited(retry_after));
    }
    if status.is_server_error() {
        return Err(HandoffError::Transient(format!("slack responded with {status}")));
    }
    Ok(())
}

/// Map a Web API `error` code to an outcome.
fn outcome_for_api_error(code: String) -> HandoffResult<DeliveryOutcome> {
    match code.as_str() {
        "ratelimited" | "rate_limited" => Err(HandoffError::RateLimited(1)),
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            Err(HandoffError::Transient(code))
        }
        _ => Ok(DeliveryOutcome::Rejected { reason: code }),
    }
}

/// Render a brief as Slack mrkdwn.
#[must_use]
pub fn format_brief(request: &HandoffRequest) -> String {
    let brief = &request.brief;
    let mut text = format!(
        "*New intake handoff* (conversation `{}`)\n>{}",
        request.conversation_id,
        brief.summary.replace('\n', "\n>")
    );

    let mut section = |title: &str, items: &[String]| {
        if items.is_empty() {
            return;
        }
        let _ = write!(text, "\n*{title}*");
        for item in items {
            let _ = write!(text, "\n• {item}");
        }
    };
    section("Goals", &brief.goals);
    section("Constraints", &brief.constraints);

    if let Some(timeline) = &brief.timeline {
        let _ = write!(text, "\n*Timeline:* {timeline}");
    }
    if let Some(budget) = &brief.budget {
        let _ = write!(text, "\n*Budget:* {budget}");
    }
    if !brief.recommended_next_steps.is_empty() {
        text.push_str("\n*Next steps*");
        for step in &brief.recommended_next_steps {
            let _ = write!(text, "\n• {step}");
        }
    }
    text
}
