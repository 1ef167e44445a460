//! Cloud Provider Adapters
//!
//! Every provider is normalized behind the `CloudAdapter` trait so the
//! aggregation and navigation layers never look at provider-specific JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             CloudAdapter Trait              │
//! │  list, upload, mkdir, delete/trash, quota   │
//! └─────────────────────────────────────────────┘
//!                      │
//!          ┌───────────┼────────────┐
//!          ▼           ▼            ▼
//!     ┌────────┐  ┌──────────┐  ┌─────────┐
//!     │ GDrive │  │ OneDrive │  │ Dropbox │
//!     └────────┘  └──────────┘  └─────────┘
//! ```
//!
//! Adapters are stateless apart from their HTTP client: the bearer token of
//! the account being served travels with every call in an `AccountSession`.

pub mod types;
pub mod http_retry;
pub mod oauth2;
pub mod google_drive;
pub mod onedrive;
pub mod dropbox;

pub use types::*;
pub use google_drive::{GoogleDriveAdapter, GoogleDriveConfig};
pub use onedrive::{OneDriveAdapter, OneDriveConfig};
pub use dropbox::DropboxAdapter;
pub use oauth2::{OAuth2Manager, OAuthConfig, TokenExchanger, TokenSet};

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::Response;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AppConfig;

/// Id every provider uses for the drive root.
pub const ROOT_FOLDER_ID: &str = "root";

/// Unified cloud provider trait
///
/// One implementation per provider. Calls never refresh tokens on their own:
/// a 401 comes back as `ProviderError::AuthExpired`.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// List one folder (`ROOT_FOLDER_ID` for the root). Providers that page on
    /// demand return a continuation; pass it back to get the next page.
    async fn list_folder(
        &self,
        session: &AccountSession,
        folder_id: &str,
        continuation: Option<&str>,
    ) -> Result<ListingPage, ProviderError>;

    /// Upload one file into `parent` (root when `None`); returns the new id.
    async fn upload_file(
        &self,
        session: &AccountSession,
        parent: Option<&str>,
        file: &UploadFile,
    ) -> Result<String, ProviderError>;

    /// Create a folder under `parent` (root when `None`); returns its id.
    async fn create_folder(
        &self,
        session: &AccountSession,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, ProviderError>;

    /// Delete an entry, falling back to trash where the provider allows it.
    async fn delete_or_trash(
        &self,
        session: &AccountSession,
        id: &str,
    ) -> Result<DeleteOutcome, ProviderError>;

    async fn get_identity(&self, token: &SecretString) -> Result<AccountIdentity, ProviderError>;

    async fn get_quota(&self, token: &SecretString) -> Result<StorageQuota, ProviderError>;

    /// Whether accounts of this provider can be offered as upload targets.
    fn supports_upload(&self) -> bool {
        true
    }

    /// URL the user can open to download or view `entry`.
    async fn resolve_download(
        &self,
        _session: &AccountSession,
        entry: &RemoteEntry,
    ) -> Result<String, ProviderError> {
        entry
            .download_handle
            .clone()
            .ok_or_else(|| ProviderError::NotFound(format!("no download link for {}", entry.name)))
    }

    /// Upload a dropped directory tree under `parent`.
    ///
    /// Folders are created on the way down and memoized by their path key, so
    /// an ancestor shared by several files is created exactly once. Files are
    /// uploaded one after another; a failure only costs that file (and the
    /// files below a folder that could not be created).
    async fn upload_folder_tree(
        &self,
        session: &AccountSession,
        parent: Option<&str>,
        files: &[TreeFile],
    ) -> UploadReport {
        let mut report = UploadReport::default();
        let mut created: HashMap<String, String> = HashMap::new();

        'files: for item in files {
            let segments: Vec<&str> = item
                .relative_path
                .split('/')
                .filter(|s| !s.is_empty() && *s != ".")
                .collect();
            let Some((_, dirs)) = segments.split_last() else {
                report.record_failure(
                    &item.relative_path,
                    &ProviderError::InvalidConfig("empty relative path".to_string()),
                );
                continue;
            };

            let mut current = parent.map(str::to_string);
            let mut path_key = String::new();
            for dir in dirs {
                if !path_key.is_empty() {
                    path_key.push('/');
                }
                path_key.push_str(dir);

                if let Some(id) = created.get(&path_key) {
                    current = Some(id.clone());
                    continue;
                }

                match self.create_folder(session, dir, current.as_deref()).await {
                    Ok(id) => {
                        debug!("Created folder {} -> {}", path_key, id);
                        created.insert(path_key.clone(), id.clone());
                        current = Some(id);
                    }
                    Err(e) => {
                        warn!("Folder {} could not be created: {}", path_key, e);
                        report.record_failure(&item.relative_path, &e);
                        continue 'files;
                    }
                }
            }

            match self.upload_file(session, current.as_deref(), &item.file).await {
                Ok(_) => report.record_success(),
                Err(e) => {
                    warn!("Upload of {} failed: {}", item.relative_path, e);
                    report.record_failure(&item.relative_path, &e);
                }
            }
        }

        report
    }
}

/// Adapter registry, one adapter per provider kind
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<ProviderKind, Arc<dyn CloudAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production adapters for every provider, built from the app config.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let client = build_http_client(Duration::from_secs(config.http_timeout_secs))?;
        let retry = config.retry_config();
        Ok(Self::new()
            .with(Arc::new(GoogleDriveAdapter::new(
                client.clone(),
                GoogleDriveConfig::from_app_config(config),
                retry.clone(),
            )))
            .with(Arc::new(OneDriveAdapter::new(
                client,
                OneDriveConfig::from_app_config(config),
                retry,
            )))
            .with(Arc::new(DropboxAdapter::new())))
    }

    pub fn with(mut self, adapter: Arc<dyn CloudAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn CloudAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CloudAdapter>, ProviderError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::NotSupported(format!("no adapter registered for {}", kind)))
    }

    /// False for providers without an adapter or without upload support.
    pub fn supports_upload(&self, kind: ProviderKind) -> bool {
        self.adapters.get(&kind).is_some_and(|a| a.supports_upload())
    }
}

/// Shared HTTP client with the configured timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::InvalidConfig(format!("HTTP client: {}", e)))
}

/// `Authorization: Bearer ...`, marked sensitive so it is never logged.
pub(crate) fn bearer(token: &SecretString) -> Result<HeaderValue, ProviderError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid token: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Pass 2xx responses through, map everything else onto the taxonomy.
pub(crate) async fn ensure_success(response: Response, context: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), context, &body))
}
