//! Google Drive Storage Provider
//!
//! Implements `CloudAdapter` for Google Drive using the Drive API v3.
//! Listings are drained page by page before they are returned.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::http_retry::{send_with_retry, HttpRetryConfig};
use super::{
    bearer, ensure_success, parse_timestamp, AccountIdentity, AccountKey, AccountSession,
    CloudAdapter, DeleteOutcome, ListingPage, ProviderError, ProviderKind, RemoteEntry,
    StorageQuota, UploadFile, ROOT_FOLDER_ID,
};
use crate::config::AppConfig;

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const LIST_FIELDS: &str = "files(id,name,mimeType,size,modifiedTime,webContentLink),nextPageToken";

/// Google Drive file metadata from API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    /// Drive reports sizes as decimal strings
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
    #[serde(default)]
    web_content_link: Option<String>,
}

/// Google Drive file list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    #[serde(default)]
    storage_quota: Option<DriveQuota>,
}

#[derive(Debug, Deserialize)]
struct DriveQuota {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    usage: Option<String>,
}

/// Google Drive endpoints and paging
#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    pub api_base: String,
    pub upload_base: String,
    pub userinfo_url: String,
    pub page_size: u32,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
            page_size: 100,
        }
    }
}

impl GoogleDriveConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_base: config.google_api_base.trim_end_matches('/').to_string(),
            upload_base: config.google_upload_base.trim_end_matches('/').to_string(),
            userinfo_url: config.google_userinfo_url.clone(),
            page_size: config.google_page_size,
        }
    }

    /// Every endpoint under one base URL (used against a local fake server).
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: format!("{}/drive/v3", base),
            upload_base: format!("{}/upload/drive/v3", base),
            userinfo_url: format!("{}/oauth2/v2/userinfo", base),
            page_size: 100,
        }
    }
}

/// Google Drive adapter
pub struct GoogleDriveAdapter {
    client: reqwest::Client,
    config: GoogleDriveConfig,
    retry: HttpRetryConfig,
}

impl GoogleDriveAdapter {
    pub fn new(client: reqwest::Client, config: GoogleDriveConfig, retry: HttpRetryConfig) -> Self {
        Self { client, config, retry }
    }

    fn list_url(&self, folder_id: &str, page_token: Option<&str>) -> String {
        let query = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let mut url = format!(
            "{}/files?q={}&fields={}&orderBy={}&pageSize={}",
            self.config.api_base,
            urlencoding::encode(&query),
            urlencoding::encode(LIST_FIELDS),
            urlencoding::encode("folder,name"),
            self.config.page_size
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &SecretString,
        context: &str,
    ) -> Result<T, ProviderError> {
        let request = self
            .client
            .get(url)
            .header(AUTHORIZATION, bearer(token)?)
            .build()?;
        let response = send_with_retry(&self.client, request, &self.retry).await?;
        let response = ensure_success(response, context).await?;
        Ok(response.json::<T>().await?)
    }

    /// Try to move an item to the trash after a refused hard delete.
    async fn trash(&self, session: &AccountSession, id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/files/{}", self.config.api_base, urlencoding::encode(id));
        let response = self
            .client
            .patch(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .json(&serde_json::json!({ "trashed": true }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() != 403 {
            return Err(ProviderError::from_status(status.as_u16(), "trash", &body));
        }
        warn!("Trash of {} refused: {}", id, super::sanitize_api_error(&body));
        Err(ProviderError::PermissionDenied(
            "Cannot delete or trash this file.".to_string(),
        ))
    }
}

/// Normalize one Drive file into a `RemoteEntry`.
fn to_remote_entry(file: DriveFile, owner: &AccountKey) -> RemoteEntry {
    let is_folder = file.mime_type.as_deref() == Some(FOLDER_MIME_TYPE);
    RemoteEntry {
        id: file.id,
        name: file.name,
        is_folder,
        mime_type: file.mime_type,
        size: file.size.as_deref().and_then(|s| s.parse().ok()),
        modified: file.modified_time.as_deref().and_then(parse_timestamp),
        download_handle: file.web_content_link,
        owner: owner.clone(),
    }
}

/// "Open in browser" URL for a Drive item; native Docs editors get their own.
pub fn google_open_url(entry: &RemoteEntry) -> String {
    let editor = match entry.mime_type.as_deref() {
        Some("application/vnd.google-apps.document") => Some("document"),
        Some("application/vnd.google-apps.spreadsheet") => Some("spreadsheets"),
        Some("application/vnd.google-apps.presentation") => Some("presentation"),
        _ => None,
    };
    match editor {
        Some(kind) => format!("https://docs.google.com/{}/d/{}/edit", kind, entry.id),
        None => format!("https://drive.google.com/file/d/{}/view", entry.id),
    }
}

fn parse_quota_value(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

#[async_trait]
impl CloudAdapter for GoogleDriveAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn list_folder(
        &self,
        session: &AccountSession,
        folder_id: &str,
        continuation: Option<&str>,
    ) -> Result<ListingPage, ProviderError> {
        let mut entries = Vec::new();
        let mut page_token = continuation.map(str::to_string);
        let mut seen_tokens: HashSet<String> = page_token.iter().cloned().collect();
        let mut pages = 0usize;

        loop {
            let url = self.list_url(folder_id, page_token.as_deref());
            let list: DriveFileList = self.get_json(&url, &session.token, "list files").await?;
            pages += 1;
            entries.extend(list.files.into_iter().map(|f| to_remote_entry(f, &session.owner)));

            match list.next_page_token {
                Some(token) if !token.is_empty() => {
                    // a repeated token would page forever
                    if !seen_tokens.insert(token.clone()) {
                        warn!("Drive repeated page token after {} page(s) of {}", pages, folder_id);
                        return Err(ProviderError::Parse(format!(
                            "page token repeated while listing {}",
                            folder_id
                        )));
                    }
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        debug!(
            "Listed {} entries in {} page(s) from folder {} of {}",
            entries.len(),
            pages,
            folder_id,
            session.owner
        );
        Ok(ListingPage::complete(entries))
    }

    async fn upload_file(
        &self,
        session: &AccountSession,
        parent: Option<&str>,
        file: &UploadFile,
    ) -> Result<String, ProviderError> {
        let mut metadata = serde_json::json!({ "name": file.name });
        if let Some(parent) = parent.filter(|p| *p != ROOT_FOLDER_ID) {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let boundary = format!("unidrive_{}", uuid::Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(file.bytes.len() + 512);

        // Metadata part
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");

        // File content part
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type()).as_bytes());
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());

        let url = format!("{}/files?uploadType=multipart&fields=id", self.config.upload_base);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
            .body(body)
            .send()
            .await?;
        let response = ensure_success(response, "upload").await?;
        let created: CreatedFile = response.json().await?;

        info!("Uploaded {} ({} bytes) to {}", file.name, file.bytes.len(), session.owner);
        Ok(created.id)
    }

    async fn create_folder(
        &self,
        session: &AccountSession,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parent) = parent.filter(|p| *p != ROOT_FOLDER_ID) {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let url = format!("{}/files?fields=id", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .json(&metadata)
            .send()
            .await?;
        let response = ensure_success(response, "create folder").await?;
        let created: CreatedFile = response.json().await?;

        info!("Created folder: {}", name);
        Ok(created.id)
    }

    async fn delete_or_trash(
        &self,
        session: &AccountSession,
        id: &str,
    ) -> Result<DeleteOutcome, ProviderError> {
        let url = format!("{}/files/{}", self.config.api_base, urlencoding::encode(id));
        let response = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .send()
            .await?;

        if response.status().as_u16() == 403 {
            info!("Delete of {} refused, moving it to the trash", id);
            self.trash(session, id).await?;
            return Ok(DeleteOutcome::Trashed);
        }

        ensure_success(response, "delete").await?;
        info!("Deleted {}", id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn get_identity(&self, token: &SecretString) -> Result<AccountIdentity, ProviderError> {
        let info: UserInfo = self.get_json(&self.config.userinfo_url, token, "userinfo").await?;
        let account_id = info
            .email
            .or(info.id)
            .ok_or_else(|| ProviderError::Parse("userinfo without email or id".to_string()))?;
        Ok(AccountIdentity {
            account_id,
            display_name: info.name,
        })
    }

    async fn get_quota(&self, token: &SecretString) -> Result<StorageQuota, ProviderError> {
        let url = format!(
            "{}/about?fields={}",
            self.config.api_base,
            urlencoding::encode("storageQuota(limit,usage)")
        );
        let about: AboutResponse = self.get_json(&url, token, "storage quota").await?;
        let quota = about.storage_quota.unwrap_or(DriveQuota { limit: None, usage: None });
        Ok(StorageQuota {
            limit_bytes: parse_quota_value(quota.limit.as_deref()),
            usage_bytes: parse_quota_value(quota.usage.as_deref()),
        })
    }

    async fn resolve_download(
        &self,
        _session: &AccountSession,
        entry: &RemoteEntry,
    ) -> Result<String, ProviderError> {
        Ok(entry
            .download_handle
            .clone()
            .unwrap_or_else(|| google_open_url(entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> AccountKey {
        AccountKey::new(ProviderKind::Google, "a@example.com")
    }

    fn adapter() -> GoogleDriveAdapter {
        GoogleDriveAdapter::new(
            reqwest::Client::new(),
            GoogleDriveConfig::default(),
            HttpRetryConfig::default(),
        )
    }

    #[test]
    fn test_to_remote_entry_folder_and_file() {
        let folder: DriveFile = serde_json::from_str(
            r#"{"id":"f1","name":"Photos","mimeType":"application/vnd.google-apps.folder"}"#,
        )
        .unwrap();
        let entry = to_remote_entry(folder, &owner());
        assert!(entry.is_folder);
        assert_eq!(entry.owner, owner());

        let file: DriveFile = serde_json::from_str(
            r#"{"id":"x","name":"a.pdf","mimeType":"application/pdf","size":"2048",
                "modifiedTime":"2024-05-01T12:00:00.000Z","webContentLink":"https://dl/x"}"#,
        )
        .unwrap();
        let entry = to_remote_entry(file, &owner());
        assert!(!entry.is_folder);
        assert_eq!(entry.size, Some(2048));
        assert!(entry.modified.is_some());
        assert_eq!(entry.download_handle.as_deref(), Some("https://dl/x"));
    }

    #[test]
    fn test_list_url_encodes_query() {
        let url = adapter().list_url("root", None);
        assert!(url.starts_with("https://www.googleapis.com/drive/v3/files?q="));
        assert!(url.contains("%27root%27%20in%20parents%20and%20trashed%20%3D%20false"));
        assert!(url.contains("orderBy=folder%2Cname"));
        assert!(!url.contains("pageToken"));

        let url = adapter().list_url("abc", Some("next/1"));
        assert!(url.contains("%27abc%27"));
        assert!(url.ends_with("&pageToken=next%2F1"));
    }

    #[test]
    fn test_google_open_url() {
        let doc = RemoteEntry::file(owner(), "d1", "Notes")
            .with_mime("application/vnd.google-apps.document");
        assert_eq!(google_open_url(&doc), "https://docs.google.com/document/d/d1/edit");

        let sheet = RemoteEntry::file(owner(), "s1", "Budget")
            .with_mime("application/vnd.google-apps.spreadsheet");
        assert_eq!(google_open_url(&sheet), "https://docs.google.com/spreadsheets/d/s1/edit");

        let png = RemoteEntry::file(owner(), "p1", "a.png").with_mime("image/png");
        assert_eq!(google_open_url(&png), "https://drive.google.com/file/d/p1/view");
    }

    #[test]
    fn test_parse_quota_value() {
        assert_eq!(parse_quota_value(Some("16106127360")), Some(16_106_127_360));
        assert_eq!(parse_quota_value(Some("n/a")), None);
        assert_eq!(parse_quota_value(None), None);
    }

    #[test]
    fn test_with_base_url() {
        let config = GoogleDriveConfig::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(config.upload_base, "http://127.0.0.1:9000/upload/drive/v3");
        assert_eq!(config.userinfo_url, "http://127.0.0.1:9000/oauth2/v2/userinfo");
    }
}
