//! Service configuration.
//!
//! Every setting has a default; environment variables prefixed with
//! `INTAKE_` override them. Call [`AppConfig::validate`] before use.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::handoff::HandoffConfig;
use crate::uploads::UploadConfig;

/// Prefix of every environment variable read by [`AppConfig::from_env`].
pub const ENV_PREFIX: &str = "INTAKE_";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("{name}: cannot parse {value:?}")]
    Parse {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port bound on all interfaces.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database file; conversations stay in memory when unset.
    pub sqlite_path: Option<String>,
}

/// Whole-service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Conversation storage.
    pub storage: StorageConfig,
    /// Upload links.
    pub uploads: UploadConfig,
    /// Handoff delivery.
    pub handoff: HandoffConfig,
}

impl AppConfig {
    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for unparsable numbers.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup`, which receives full variable names.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for unparsable numbers.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(port) = parse(&var, "PORT")? {
            config.server.port = port;
        }
        config.storage.sqlite_path = var("SQLITE_PATH");

        let uploads = &mut config.uploads;
        if let Some(url) = var("UPLOAD_BASE_URL") {
            uploads.upload_base_url = url;
        }
        if let Some(url) = var("FILE_BASE_URL") {
            uploads.public_base_url = url;
        }
        uploads.signing_secret = var("UPLOAD_SIGNING_SECRET");
        if let Some(max) = parse(&var, "UPLOAD_MAX_BYTES")? {
            uploads.max_content_length = max;
        }

        let handoff = &mut config.handoff;
        handoff.slack.bot_token = var("SLACK_BOT_TOKEN");
        handoff.slack.webhook_url = var("SLACK_WEBHOOK_URL");
        if let Some(channel) = var("SLACK_DEFAULT_CHANNEL") {
            handoff.slack.default_channel = channel;
        }
        if let Some(url) = var("SLACK_API_BASE_URL") {
            handoff.slack.api_base_url = url;
        }
        if let Some(attempts) = parse(&var, "HANDOFF_MAX_ATTEMPTS")? {
            handoff.retry.max_attempts = attempts;
        }
        if let Some(capacity) = parse(&var, "HANDOFF_QUEUE_CAPACITY")? {
            handoff.queue_capacity = capacity;
        }
        if let Some(concurrency) = parse(&var, "HANDOFF_CONCURRENCY")? {
            handoff.concurrency = concurrency;
        }

        Ok(config)
    }

    /// Check ranges and URLs.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.uploads.max_content_length == 0 {
            return Err(ConfigError::Invalid(
                "uploads.max_content_length must be > 0".to_string(),
            ));
        }
        if self.uploads.link_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "uploads.link_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.handoff.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "handoff.retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.handoff.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "handoff.queue_capacity must be > 0".to_string(),
            ));
        }
        if self.handoff.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "handoff.concurrency must be > 0".to_string(),
            ));
        }
        if self.handoff.slack.default_channel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "handoff.slack.default_channel must not be empty".to_string(),
            ));
        }

        check_url("uploads.upload_base_url", &self.uploads.upload_base_url)?;
        check_url("uploads.public_base_url", &self.uploads.public_base_url)?;
        check_url("handoff.slack.api_base_url", &self.handoff.slack.api_base_url)?;
        if let Some(webhook) = &self.handoff.slack.webhook_url {
            check_url("handoff.slack.webhook_url", webhook)?;
        }
        Ok(())
    }
}

fn parse<T, F>(var: &F, key: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::Parse {
                name: format!("{ENV_PREFIX}{key}"),
                value,
            })
        })
        .transpose()
}

fn check_url(field: &str, raw: &str) -> ConfigResult<()> {
    let url = Url::parse(raw).map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "{field}: expected an http(s) url"
        )));
    }
    Ok(())
}
