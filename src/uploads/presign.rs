//! Presigned upload links.
//!
//! A link is a capability: the upload URL carries its expiry, a random token
//! and an HMAC-SHA256 signature over everything the upload is allowed to do
//! (method, object key, content type, declared length, expiry, token).
//! Issuing a link keeps no state; [`UploadTokenLedger`] enforces single use
//! when the upload is received.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::conversation::core::ids::UploadToken;
use crate::uploads::config::UploadConfig;

type HmacSha256 = Hmac<Sha256>;

/// HTTP method uploads must use.
pub const UPLOAD_METHOD: &str = "PUT";

const MAX_FILE_NAME_CHARS: usize = 128;

/// Upload link failures.
#[derive(Debug, Error)]
pub enum PresignError {
    /// The request is not acceptable.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The URL is not one of ours or is missing parameters.
    #[error("malformed upload url: {0}")]
    Malformed(String),

    /// The signature does not match.
    #[error("upload signature mismatch")]
    InvalidSignature,

    /// The link is at or past its expiry.
    #[error("upload link expired at {0}")]
    Expired(DateTime<Utc>),

    /// The token was already used.
    #[error("upload token {0} already redeemed")]
    AlreadyRedeemed(UploadToken),

    /// Bad presigner configuration.
    #[error("upload configuration error: {0}")]
    Config(String),
}

/// Result alias for upload operations.
pub type PresignResult<T> = Result<T, PresignError>;

/// What the client wants to upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Original file name.
    pub file_name: String,
    /// MIME type the upload will be sent with.
    pub content_type: String,
    /// Declared size in bytes.
    #[serde(default)]
    pub content_length: Option<u64>,
}

/// A signed, short-lived upload capability.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLink {
    /// Where to send the file.
    pub upload_url: String,
    /// Where the file will be readable once uploaded.
    pub file_url: String,
    /// Always `PUT`.
    pub method: String,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// `issued_at` plus the link lifetime.
    pub expires_at: DateTime<Utc>,
    /// Headers the upload must carry.
    pub headers: BTreeMap<String, String>,
}

/// An upload URL whose signature checked out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifiedUpload {
    /// Single-use token.
    pub token: UploadToken,
    /// Object key inside the upload bucket.
    pub object_key: String,
    /// Signed content type.
    pub content_type: String,
    /// Signed length, if one was declared.
    pub content_length: Option<u64>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks upload links.
pub struct UploadPresigner {
    upload_base: Url,
    public_base: Url,
    secret: Vec<u8>,
    max_content_length: u64,
    ttl: Duration,
}

impl UploadPresigner {
    /// Build a presigner.
    ///
    /// # Errors
    /// Returns [`PresignError::Config`] for unusable base URLs or an empty
    /// secret.
    pub fn new(config: &UploadConfig, secret: &[u8]) -> PresignResult<Self> {
        if secret.is_empty() {
            return Err(PresignError::Config("signing secret is empty".to_string()));
        }
        Ok(Self {
            upload_base: parse_base(&config.upload_base_url)?,
            public_base: parse_base(&config.public_base_url)?,
            secret: secret.to_vec(),
            max_content_length: config.max_content_length,
            ttl: Duration::seconds(config.link_ttl_secs),
        })
    }

    /// Largest accepted declared size.
    #[must_use]
    pub const fn max_content_length(&self) -> u64 {
        self.max_content_length
    }

    /// Issue an upload link valid until `now` plus the configured lifetime.
    ///
    /// # Errors
    /// Returns [`PresignError::Validation`] for a blank file name, a content
    /// type that is not `type/subtype`, or a declared length above the
    /// maximum.
    pub fn issue(&self, request: &UploadRequest, now: DateTime<Utc>) -> PresignResult<UploadLink> {
        let content_type = request.content_type.trim().to_ascii_lowercase();
        // Zero means no declared length.
        let content_length = request.content_length.filter(|&length| length > 0);

        let mut problems = Vec::new();
        if request.file_name.trim().is_empty() {
            problems.push("fileName is required".to_string());
        }
        if !is_mime_type(&content_type) {
            problems.push("contentType must look like type/subtype".to_string());
        }
        if let Some(length) = content_length.filter(|&length| length > self.max_content_length) {
            problems.push(format!(
                "contentLength {length} exceeds the maximum of {} bytes",
                self.max_content_length
            ));
        }
        if !problems.is_empty() {
            return Err(PresignError::Validation(problems));
        }

        let issued_at = now.trunc_subsecs(3);
        let expires_at = issued_at + self.ttl;
        let token = UploadToken::new();
        let object_key = format!(
            "uploads/{}/{token}/{}",
            issued_at.format("%Y/%m"),
            sanitize_file_name(&request.file_name)
        );

        let signature = self.sign(
            &object_key,
            &content_type,
            content_length,
            expires_at,
            token,
        )?;

        let mut upload_url = with_key(&self.upload_base, &object_key)?;
        {
            let mut query = upload_url.query_pairs_mut();
            query.append_pair("expires", &expires_at.timestamp_millis().to_string());
            query.append_pair("token", &token.to_string());
            if let Some(length) = content_length {
                query.append_pair("length", &length.to_string());
            }
            query.append_pair("signature", &signature);
        }
        let file_url = with_key(&self.public_base, &object_key)?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), content_type);
        if let Some(length) = content_length {
            headers.insert("Content-Length".to_string(), length.to_string());
        }

        info!(%token, object_key = %object_key, %expires_at, "Upload link issued");
        Ok(UploadLink {
            upload_url: upload_url.into(),
            file_url: file_url.into(),
            method: UPLOAD_METHOD.to_string(),
            issued_at,
            expires_at,
            headers,
        })
    }

    /// Check an incoming upload against the link it claims to come from.
    ///
    /// `content_type` is the `Content-Type` the upload arrived with.
    ///
    /// # Errors
    /// Returns [`PresignError::Malformed`] for URLs not issued here,
    /// [`PresignError::InvalidSignature`] when anything signed was altered,
    /// or [`PresignError::Expired`] at or after the expiry.
    pub fn verify(
        &self,
        upload_url: &str,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> PresignResult<VerifiedUpload> {
        let url = Url::parse(upload_url).map_err(|err| PresignError::Malformed(err.to_string()))?;
        if url.scheme() != self.upload_base.scheme()
            || url.host_str() != self.upload_base.host_str()
            || url.port_or_known_default() != self.upload_base.port_or_known_default()
        {
            return Err(PresignError::Malformed("foreign host".to_string()));
        }

        let base_path = self.upload_base.path().trim_end_matches('/');
        let object_key = url
            .path()
            .strip_prefix(base_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| key.starts_with("uploads/"))
            .ok_or_else(|| PresignError::Malformed("unexpected path".to_string()))?
            .to_string();

        let mut expires = None;
        let mut token = None;
        let mut length = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "token" => token = value.parse::<UploadToken>().ok(),
                "length" => {
                    length = Some(value.parse::<u64>().map_err(|_| {
                        PresignError::Malformed("length is not a number".to_string())
                    })?);
                }
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let missing = |name: &str| PresignError::Malformed(format!("missing or invalid {name}"));
        let expires_at = expires
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| missing("expires"))?;
        let token = token.ok_or_else(|| missing("token"))?;
        let signature = signature.ok_or_else(|| missing("signature"))?;
        let provided = URL_SAFE_NO_PAD
            .decode(signature.as_bytes())
            .map_err(|_| PresignError::InvalidSignature)?;

        let content_type = content_type.trim().to_ascii_lowercase();
        let mut mac = self.mac()?;
        mac.update(canonical(&object_key, &content_type, length, expires_at, token).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| PresignError::InvalidSignature)?;

        if now >= expires_at {
            return Err(PresignError::Expired(expires_at));
        }

        debug!(%token, object_key = %object_key, "Upload link verified");
        Ok(VerifiedUpload {
            token,
            object_key,
            content_type,
            content_length: length,
            expires_at,
        })
    }

    fn mac(&self) -> PresignResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| PresignError::Config(format!("invalid HMAC key: {err}")))
    }

    fn sign(
        &self,
        object_key: &str,
        content_type: &str,
        length: Option<u64>,
        expires_at: DateTime<Utc>,
        token: UploadToken,
    ) -> PresignResult<String> {
        let mut mac = self.mac()?;
        mac.update(canonical(object_key, content_type, length, expires_at, token).as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

/// Remembers redeemed tokens until their links expire.
#[derive(Debug, Default)]
pub struct UploadTokenLedger {
    redeemed: DashMap<UploadToken, DateTime<Utc>>,
}

impl UploadTokenLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a verified upload's token.
    ///
    /// # Errors
    /// Returns [`PresignError::AlreadyRedeemed`] on reuse, or
    /// [`PresignError::Expired`] if the link has expired since verification.
    pub fn redeem(&self, upload: &VerifiedUpload, now: DateTime<Utc>) -> PresignResult<()> {
        self.redeemed.retain(|_, expires_at| *expires_at > now);
        if now >= upload.expires_at {
            return Err(PresignError::Expired(upload.expires_at));
        }
        match self.redeemed.entry(upload.token) {
            Entry::Occupied(_) => Err(PresignError::AlreadyRedeemed(upload.token)),
            Entry::Vacant(slot) => {
                slot.insert(upload.expires_at);
                Ok(())
            }
        }
    }

    /// Tokens still remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.redeemed.len()
    }

    /// Whether no token is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redeemed.is_empty()
    }
}

fn canonical(
    object_key: &str,
    content_type: &str,
    length: Option<u64>,
    expires_at: DateTime<Utc>,
    token: UploadToken,
) -> String {
    format!(
        "{UPLOAD_METHOD}\n{object_key}\n{content_type}\n{}\n{}\n{token}",
        length.map(|l| l.to_string()).unwrap_or_default(),
        expires_at.timestamp_millis()
    )
}

fn parse_base(raw: &str) -> PresignResult<Url> {
    let url = Url::parse(raw).map_err(|err| PresignError::Config(format!("{raw}: {err}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(PresignError::Config(format!("{raw}: not a base url")));
    }
    Ok(url)
}

fn with_key(base: &Url, object_key: &str) -> PresignResult<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| PresignError::Config(format!("{base}: not a base url")))?
        .pop_if_empty()
        .extend(object_key.split('/'));
    Ok(url)
}

fn is_mime_type(value: &str) -> bool {
    let token = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
    };
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence
        .split_once('/')
        .is_some_and(|(kind, subtype)| token(kind) && token(subtype))
}

/// Reduce a client file name to a safe final path segment.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let trimmed: String = out
        .trim_matches(|c| c == '-' || c == '.')
        .chars()
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}
