//! Upload link configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 25 MiB.
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 25 * 1024 * 1024;

/// Lifetime of an upload link, in seconds.
pub const DEFAULT_LINK_TTL_SECS: i64 = 15 * 60;

/// Where uploads go and how links are signed.
#[derive(Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Base URL clients `PUT` files to.
    pub upload_base_url: String,
    /// Base URL uploaded files are served from.
    pub public_base_url: String,
    /// HMAC secret; a random one is generated at startup when unset.
    pub signing_secret: Option<String>,
    /// Largest accepted declared size, in bytes.
    pub max_content_length: u64,
    /// Link lifetime in seconds.
    pub link_ttl_secs: i64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_base_url: "https://uploads.example.com".to_string(),
            public_base_url: "https://cdn.example.com".to_string(),
            signing_secret: None,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            link_ttl_secs: DEFAULT_LINK_TTL_SECS,
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("upload_base_url", &self.upload_base_url)
            .field("public_base_url", &self.public_base_url)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("max_content_length", &self.max_content_length)
            .field("link_ttl_secs", &self.link_ttl_secs)
            .finish()
    }
}
