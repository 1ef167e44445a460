//! Dropbox Storage Provider
//!
//! Only the OAuth2 code exchange is wired up for Dropbox (see
//! `OAuthConfig::dropbox`). The account id comes from the token response.
//! File operations are not implemented and report `NotSupported`, so a
//! connected Dropbox account contributes no entries to the aggregated view
//! and is never offered as an upload target.

use async_trait::async_trait;
use secrecy::SecretString;

use super::{
    AccountIdentity, AccountSession, CloudAdapter, DeleteOutcome, ListingPage, ProviderError,
    ProviderKind, StorageQuota, UploadFile,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DropboxAdapter;

impl DropboxAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn unsupported(operation: &str) -> ProviderError {
    ProviderError::NotSupported(format!("Dropbox {}", operation))
}

#[async_trait]
impl CloudAdapter for DropboxAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dropbox
    }

    async fn list_folder(
        &self,
        _session: &AccountSession,
        _folder_id: &str,
        _continuation: Option<&str>,
    ) -> Result<ListingPage, ProviderError> {
        Err(unsupported("listing"))
    }

    async fn upload_file(
        &self,
        _session: &AccountSession,
        _parent: Option<&str>,
        _file: &UploadFile,
    ) -> Result<String, ProviderError> {
        Err(unsupported("upload"))
    }

    async fn create_folder(
        &self,
        _session: &AccountSession,
        _name: &str,
        _parent: Option<&str>,
    ) -> Result<String, ProviderError> {
        Err(unsupported("folder creation"))
    }

    async fn delete_or_trash(
        &self,
        _session: &AccountSession,
        _id: &str,
    ) -> Result<DeleteOutcome, ProviderError> {
        Err(unsupported("delete"))
    }

    async fn get_identity(&self, _token: &SecretString) -> Result<AccountIdentity, ProviderError> {
        Err(unsupported("account info"))
    }

    async fn get_quota(&self, _token: &SecretString) -> Result<StorageQuota, ProviderError> {
        Err(unsupported("quota"))
    }

    fn supports_upload(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Account;

    #[tokio::test]
    async fn test_file_operations_not_supported() {
        let adapter = DropboxAdapter::new();
        let session = Account::new(ProviderKind::Dropbox, "dbid:1", "tok").session();
        assert!(matches!(
            adapter.list_folder(&session, "root", None).await,
            Err(ProviderError::NotSupported(_))
        ));
        assert!(matches!(
            adapter.delete_or_trash(&session, "x").await,
            Err(ProviderError::NotSupported(_))
        ));
        assert!(matches!(
            adapter.get_quota(&session.token).await,
            Err(ProviderError::NotSupported(_))
        ));
        assert!(!adapter.supports_upload());
    }
}
