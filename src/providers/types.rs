//! Shared types for cloud providers
//!
//! This module contains the types every adapter and the aggregation layer
//! agree on: provider kinds, connected accounts, normalized remote entries,
//! listing pages and the error taxonomy.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Drive (OAuth2, Drive API v3)
    Google,
    /// Microsoft OneDrive (OAuth2, Graph API v1.0)
    OneDrive,
    /// Dropbox (OAuth2 code exchange only)
    Dropbox,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Google => write!(f, "Google Drive"),
            ProviderKind::OneDrive => write!(f, "OneDrive"),
            ProviderKind::Dropbox => write!(f, "Dropbox"),
        }
    }
}

impl ProviderKind {
    /// Stable lowercase identifier, used for persistence keys
    pub fn slug(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::OneDrive => "onedrive",
            ProviderKind::Dropbox => "dropbox",
        }
    }

    pub fn all() -> [ProviderKind; 3] {
        [ProviderKind::Google, ProviderKind::OneDrive, ProviderKind::Dropbox]
    }
}

/// Identity of a connected account: provider plus the provider's account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub kind: ProviderKind,
    pub account_id: String,
}

impl AccountKey {
    pub fn new(kind: ProviderKind, account_id: impl Into<String>) -> Self {
        Self { kind, account_id: account_id.into() }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.account_id, self.kind)
    }
}

/// Free space of an account. `Unlimited` orders above every finite amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FreeSpace {
    Finite(u64),
    Unlimited,
}

/// One authenticated connection to one provider
///
/// Tokens are kept as `SecretString` so they never leak through `Debug`.
#[derive(Debug, Clone)]
pub struct Account {
    pub kind: ProviderKind,
    /// Opaque provider account id (usually the email address)
    pub account_id: String,
    pub display_name: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp (seconds) when the access token expires, if known
    pub token_expires_at: Option<i64>,
    /// Storage limit in bytes; `None` or negative means unlimited
    pub storage_limit_bytes: Option<i64>,
    pub storage_usage_bytes: Option<i64>,
}

impl Account {
    pub fn new(kind: ProviderKind, account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            kind,
            account_id: account_id.into(),
            display_name: None,
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            token_expires_at: None,
            storage_limit_bytes: None,
            storage_usage_bytes: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_quota(mut self, quota: StorageQuota) -> Self {
        self.storage_limit_bytes = quota.limit_bytes;
        self.storage_usage_bytes = quota.usage_bytes;
        self
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.kind, self.account_id.clone())
    }

    /// Label shown in account pickers: "Name • email" or just the id.
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => format!("{} • {}", name, self.account_id),
            _ => self.account_id.clone(),
        }
    }

    /// Remaining space; an unknown or negative limit counts as unlimited.
    pub fn free_space(&self) -> FreeSpace {
        match self.storage_limit_bytes {
            Some(limit) if limit >= 0 => {
                let used = self.storage_usage_bytes.unwrap_or(0);
                FreeSpace::Finite(limit.saturating_sub(used).max(0) as u64)
            }
            _ => FreeSpace::Unlimited,
        }
    }

    /// Owner key plus bearer token, detached from the store so calls can run
    /// without holding its lock.
    pub fn session(&self) -> AccountSession {
        AccountSession {
            owner: self.key(),
            token: self.access_token.clone(),
        }
    }
}

/// Credentials for exactly one adapter call
#[derive(Debug, Clone)]
pub struct AccountSession {
    pub owner: AccountKey,
    pub token: SecretString,
}

/// Cross-provider key of a remote entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub owner: AccountKey,
    pub id: String,
}

/// Remote file/folder entry
///
/// Unified representation of a listing item across all providers. The `id` is
/// only unique inside its owning account; use [`EntryKey`] across accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    /// MIME type or other type hint used for category filtering
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    /// Provider download URL or id, when the listing carries one
    pub download_handle: Option<String>,
    pub owner: AccountKey,
}

impl RemoteEntry {
    pub fn file(owner: AccountKey, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_folder: false,
            mime_type: None,
            size: None,
            modified: None,
            download_handle: None,
            owner,
        }
    }

    pub fn folder(owner: AccountKey, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_folder: true,
            ..Self::file(owner, id, name)
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            owner: self.owner.clone(),
            id: self.id.clone(),
        }
    }

    /// Modification time in milliseconds; a missing timestamp sorts as epoch 0.
    pub fn modified_millis(&self) -> i64 {
        self.modified.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub entries: Vec<RemoteEntry>,
    /// Opaque cursor for the next page, `None` when the listing is complete
    pub continuation: Option<String>,
}

impl ListingPage {
    pub fn complete(entries: Vec<RemoteEntry>) -> Self {
        Self { entries, continuation: None }
    }
}

/// Storage quota as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    /// `None` or negative = unlimited
    pub limit_bytes: Option<i64>,
    pub usage_bytes: Option<i64>,
}

/// Who a token belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account_id: String,
    pub display_name: Option<String>,
}

/// A local file ready to be sent to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes, mime_type: None }
    }

    pub fn content_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("application/octet-stream")
    }
}

/// A file of a dropped directory tree. `relative_path` uses `/` separators and
/// ends with the file's own name.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeFile {
    pub relative_path: String,
    pub file: UploadFile,
}

/// Result of deleting an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Permanently removed
    Deleted,
    /// Hard delete was refused, the item was moved to the trash instead
    Trashed,
}

/// Outcome of an upload; for folder trees partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// "path: reason" for each failed file
    pub errors: Vec<String>,
}

impl UploadReport {
    pub fn record_success(&mut self) {
        self.uploaded += 1;
    }

    pub fn record_failure(&mut self, path: &str, error: &ProviderError) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", path, error));
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.failed
    }

    /// "3 of 4 files uploaded"
    pub fn summary(&self) -> String {
        format!("{} of {} files uploaded", self.uploaded, self.total())
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    /// 401 from a provider. Never retried automatically.
    #[error("Access token expired: {0}")]
    AuthExpired(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No account connected")]
    NoAccountConnected,

    #[error("Account not connected: {0}")]
    NotConnected(AccountKey),

    #[error("Upload failed: {reason} ({uploaded} uploaded, {failed} failed)")]
    UploadFailed {
        reason: String,
        uploaded: usize,
        failed: usize,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid navigation: {0}")]
    InvalidNavigation(String),

    #[error("Credential storage error: {0}")]
    Credentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Map a non-success HTTP status to the taxonomy.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let detail = sanitize_api_error(body);
        let message = if detail.is_empty() {
            context.to_string()
        } else {
            format!("{}: {}", context, detail)
        };
        match status {
            401 => ProviderError::AuthExpired(message),
            403 => ProviderError::PermissionDenied(message),
            404 => ProviderError::NotFound(message),
            _ => ProviderError::Api { status, message },
        }
    }

    /// Transport or JSON failure (the catch-all bucket).
    pub fn is_network_or_parse(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::Parse(_))
    }

    /// Re-tag a failed single-file upload. Expired tokens and transport
    /// failures keep their own kind.
    pub fn into_upload_failure(self) -> Self {
        match self {
            ProviderError::AuthExpired(_)
            | ProviderError::Network(_)
            | ProviderError::UploadFailed { .. } => self,
            other => ProviderError::UploadFailed {
                reason: other.to_string(),
                uploaded: 0,
                failed: 1,
            },
        }
    }

    /// Human-readable text for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::AuthExpired(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ProviderError::NoAccountConnected => "Connect an account first.".to_string(),
            ProviderError::NotConnected(key) => {
                format!("{} is no longer connected.", key)
            }
            ProviderError::UploadFailed { reason, uploaded, failed } if *uploaded > 0 => {
                format!("{} of {} files uploaded ({})", uploaded, uploaded + failed, reason)
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Parse(e.to_string())
    }
}

/// Pull a short message out of a provider error body.
///
/// Google and Graph both nest it under `error.message`; anything else is
/// truncated so whole HTML pages never end up in the UI.
pub fn sanitize_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value["error"]["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = value["error_description"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = value["error"].as_str() {
            return msg.to_string();
        }
    }
    trimmed.chars().take(200).collect()
}

/// Parse an RFC 3339 timestamp as returned by Drive and Graph.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(limit: Option<i64>, usage: Option<i64>) -> Account {
        Account::new(ProviderKind::Google, "a@example.com", "tok").with_quota(StorageQuota {
            limit_bytes: limit,
            usage_bytes: usage,
        })
    }

    #[test]
    fn test_free_space() {
        assert_eq!(account(None, Some(10)).free_space(), FreeSpace::Unlimited);
        assert_eq!(account(Some(-1), None).free_space(), FreeSpace::Unlimited);
        assert_eq!(account(Some(100), Some(40)).free_space(), FreeSpace::Finite(60));
        assert_eq!(account(Some(100), None).free_space(), FreeSpace::Finite(100));
        // over quota never goes negative
        assert_eq!(account(Some(100), Some(150)).free_space(), FreeSpace::Finite(0));
        assert!(FreeSpace::Unlimited > FreeSpace::Finite(u64::MAX));
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(ProviderError::from_status(401, "list", ""), ProviderError::AuthExpired(_)));
        assert!(matches!(ProviderError::from_status(403, "delete", ""), ProviderError::PermissionDenied(_)));
        assert!(matches!(ProviderError::from_status(404, "get", ""), ProviderError::NotFound(_)));
        match ProviderError::from_status(500, "list", r#"{"error":{"message":"Backend Error"}}"#) {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "list: Backend Error");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_api_error_truncates() {
        let html = "x".repeat(500);
        assert_eq!(sanitize_api_error(&html).len(), 200);
        assert_eq!(sanitize_api_error(r#"{"error":"invalid_grant"}"#), "invalid_grant");
    }

    #[test]
    fn test_into_upload_failure_keeps_auth_expired() {
        let err = ProviderError::AuthExpired("upload".into()).into_upload_failure();
        assert!(matches!(err, ProviderError::AuthExpired(_)));
        let err = ProviderError::PermissionDenied("upload".into()).into_upload_failure();
        assert!(matches!(err, ProviderError::UploadFailed { failed: 1, .. }));
    }

    #[test]
    fn test_modified_millis_defaults_to_epoch() {
        let owner = AccountKey::new(ProviderKind::OneDrive, "me");
        let entry = RemoteEntry::file(owner.clone(), "1", "a.txt");
        assert_eq!(entry.modified_millis(), 0);
        let ts = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        assert_eq!(entry.with_modified(ts).modified_millis(), ts.timestamp_millis());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_account_label() {
        let acc = Account::new(ProviderKind::Google, "a@example.com", "t");
        assert_eq!(acc.label(), "a@example.com");
        assert_eq!(acc.with_display_name("Ann").label(), "Ann • a@example.com");
    }
}
