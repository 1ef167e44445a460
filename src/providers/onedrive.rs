//! OneDrive Storage Provider
//!
//! Implements `CloudAdapter` for Microsoft OneDrive using the Microsoft Graph API.
//! Listings are paged on demand: each call returns one page and hands the
//! `@odata.nextLink` back as continuation.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::{debug, info};

use super::http_retry::{send_with_retry, HttpRetryConfig};
use super::{
    bearer, ensure_success, parse_timestamp, AccountIdentity, AccountKey, AccountSession,
    CloudAdapter, DeleteOutcome, ListingPage, ProviderError, ProviderKind, RemoteEntry,
    StorageQuota, UploadFile, ROOT_FOLDER_ID,
};
use crate::config::AppConfig;

/// Microsoft Graph API base URL
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Graph rejects simple uploads above 4 MiB
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;

/// OneDrive item metadata
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    last_modified_date_time: Option<String>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default)]
    file: Option<FileFacet>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FileFacet {
    mime_type: Option<String>,
}

/// List children response
#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadInfo {
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    mail: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveInfo {
    #[serde(default)]
    quota: Option<DriveQuota>,
}

#[derive(Debug, Deserialize)]
struct DriveQuota {
    total: Option<i64>,
    used: Option<i64>,
}

/// OneDrive endpoints and limits
#[derive(Debug, Clone)]
pub struct OneDriveConfig {
    pub graph_base: String,
    pub page_size: u32,
    pub simple_upload_limit: u64,
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            graph_base: GRAPH_API_BASE.to_string(),
            page_size: 25,
            simple_upload_limit: SIMPLE_UPLOAD_LIMIT,
        }
    }
}

impl OneDriveConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            graph_base: config.onedrive_graph_base.trim_end_matches('/').to_string(),
            page_size: config.onedrive_page_size,
            simple_upload_limit: SIMPLE_UPLOAD_LIMIT,
        }
    }

    pub fn with_base_url(base: &str) -> Self {
        Self {
            graph_base: format!("{}/v1.0", base.trim_end_matches('/')),
            ..Self::default()
        }
    }
}

/// OneDrive adapter
pub struct OneDriveAdapter {
    client: reqwest::Client,
    config: OneDriveConfig,
    retry: HttpRetryConfig,
}

impl OneDriveAdapter {
    pub fn new(client: reqwest::Client, config: OneDriveConfig, retry: HttpRetryConfig) -> Self {
        Self { client, config, retry }
    }

    /// `/me/drive/root` or `/me/drive/items/{id}`
    fn api_item(&self, item_id: &str) -> String {
        if item_id.is_empty() || item_id == ROOT_FOLDER_ID {
            format!("{}/me/drive/root", self.config.graph_base)
        } else {
            format!("{}/me/drive/items/{}", self.config.graph_base, urlencoding::encode(item_id))
        }
    }

    fn children_url(&self, folder_id: &str) -> String {
        format!(
            "{}/children?$orderby={}&$top={}",
            self.api_item(folder_id),
            urlencoding::encode("lastModifiedDateTime desc"),
            self.config.page_size
        )
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
}

/// Convert DriveItem to RemoteEntry
fn to_remote_entry(item: DriveItem, owner: &AccountKey) -> RemoteEntry {
    let is_folder = item.folder.is_some();
    RemoteEntry {
        id: item.id,
        name: item.name,
        is_folder,
        mime_type: item.file.and_then(|f| f.mime_type),
        size: if is_folder { None } else { item.size },
        modified: item.last_modified_date_time.as_deref().and_then(parse_timestamp),
        download_handle: item.download_url,
        owner: owner.clone(),
    }
}

#[async_trait]
impl CloudAdapter for OneDriveAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OneDrive
    }

    async fn list_folder(
        &self,
        session: &AccountSession,
        folder_id: &str,
        continuation: Option<&str>,
    ) -> Result<ListingPage, ProviderError> {
        let url = match continuation {
            Some(link) => link.to_string(),
            None => self.children_url(folder_id),
        };
        let page: ChildrenResponse = self.get_json(&url, &session.token, "list children").await?;

        let entries: Vec<RemoteEntry> = page
            .value
            .into_iter()
            .map(|item| to_remote_entry(item, &session.owner))
            .collect();
        debug!(
            "Listed {} entries from folder {} of {} (more: {})",
            entries.len(),
            folder_id,
            session.owner,
            page.next_link.is_some()
        );

        Ok(ListingPage {
            entries,
            continuation: page.next_link,
        })
    }

    async fn upload_file(
        &self,
        session: &AccountSession,
        parent: Option<&str>,
        file: &UploadFile,
    ) -> Result<String, ProviderError> {
        let size = file.bytes.len() as u64;
        if size > self.config.simple_upload_limit {
            return Err(ProviderError::UploadFailed {
                reason: format!(
                    "{} is {} bytes, simple upload accepts at most {}",
                    file.name, size, self.config.simple_upload_limit
                ),
                uploaded: 0,
                failed: 1,
            });
        }

        let url = format!(
            "{}:/{}:/content",
            self.api_item(parent.unwrap_or(ROOT_FOLDER_ID)),
            urlencoding::encode(&file.name)
        );
        let response = self
            .client
            .put(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .header(CONTENT_TYPE, file.content_type())
            .body(file.bytes.clone())
            .send()
            .await?;
        let response = ensure_success(response, "upload").await?;
        let created: CreatedItem = response.json().await?;

        info!("Uploaded {} ({} bytes) to {}", file.name, size, session.owner);
        Ok(created.id)
    }

    async fn create_folder(
        &self,
        session: &AccountSession,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/children", self.api_item(parent.unwrap_or(ROOT_FOLDER_ID)));
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename"
        });

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer(&session.token)?)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, "create folder").await?;
        let created: CreatedItem = response.json().await?;

        info!("Created folder: {}", name);
        Ok(created.id)
    }

    async fn delete_or_trash(
        &self,
        session: &AccountSession,
        id: &str,
    ) -> Result<DeleteOutcome, ProviderError> {
        // Graph DELETE already moves the item to the recycle bin
        let response = self
            .client
            .delete(self.api_item(id))
            .header(AUTHORIZATION, bearer(&session.token)?)
            .send()
            .await?;
        ensure_success(response, "delete").await?;

        info!("Deleted {}", id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn get_identity(&self, token: &SecretString) -> Result<AccountIdentity, ProviderError> {
        let url = format!("{}/me", self.config.graph_base);
        let user: GraphUser = self.get_json(&url, token, "profile").await?;
        let account_id = user
            .mail
            .or(user.user_principal_name)
            .or(user.id)
            .ok_or_else(|| ProviderError::Parse("profile without mail or id".to_string()))?;
        Ok(AccountIdentity {
            account_id,
            display_name: user.display_name,
        })
    }

    async fn get_quota(&self, token: &SecretString) -> Result<StorageQuota, ProviderError> {
        let url = format!("{}/me/drive", self.config.graph_base);
        let drive: DriveInfo = self.get_json(&url, token, "storage quota").await?;
        Ok(match drive.quota {
            Some(quota) => StorageQuota {
                limit_bytes: quota.total,
                usage_bytes: quota.used,
            },
            None => StorageQuota::default(),
        })
    }

    async fn resolve_download(
        &self,
        session: &AccountSession,
        entry: &RemoteEntry,
    ) -> Result<String, ProviderError> {
        if let Some(url) = &entry.download_handle {
            return Ok(url.clone());
        }

        let url = format!(
            "{}?select={}",
            self.api_item(&entry.id),
            urlencoding::encode("@microsoft.graph.downloadUrl,webUrl")
        );
        let info: DownloadInfo = self.get_json(&url, &session.token, "download link").await?;
        info.download_url
            .or(info.web_url)
            .ok_or_else(|| ProviderError::NotFound(format!("no download link for {}", entry.name)))
    }
}
