//! Upload and delete routing
//!
//! Decides which account an operation runs against and normalizes the result.
//! The browser owns the state around it (pending upload, re-fetch afterwards).

use tracing::{info, warn};

use crate::providers::{
    Account, AccountKey, AccountSession, AdapterSet, CloudAdapter, DeleteOutcome, ProviderError,
    RemoteEntry, TreeFile, UploadFile, UploadReport,
};
use crate::token_store::TokenStore;

/// What the user dropped or picked
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPayload {
    File(UploadFile),
    FolderTree(Vec<TreeFile>),
}

impl UploadPayload {
    pub fn file_count(&self) -> usize {
        match self {
            UploadPayload::File(_) => 1,
            UploadPayload::FolderTree(files) => files.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountChoice {
    Account(AccountKey),
    /// Whichever account has the most free space right now
    MostFreeSpace,
}

/// One row of the account picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChoice {
    pub choice: AccountChoice,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    Completed(UploadReport),
    /// Several accounts are connected; resume with `choose_upload_account`
    ChooseAccount(Vec<UploadChoice>),
}

/// Upload waiting for the user to pick an account
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub payload: UploadPayload,
    pub choices: Vec<UploadChoice>,
}

/// Connected accounts whose provider accepts uploads, in connection order.
pub fn upload_candidates(store: &TokenStore, adapters: &AdapterSet) -> Result<Vec<AccountKey>, ProviderError> {
    let candidates: Vec<AccountKey> = store
        .accounts()
        .iter()
        .filter(|a| adapters.supports_upload(a.kind))
        .map(Account::key)
        .collect();
    if candidates.is_empty() {
        return Err(ProviderError::NoAccountConnected);
    }
    Ok(candidates)
}

/// Every upload-capable account, then the "most free space" shortcut.
pub fn account_choices(store: &TokenStore, adapters: &AdapterSet) -> Vec<UploadChoice> {
    let mut choices: Vec<UploadChoice> = store
        .accounts()
        .iter()
        .filter(|a| adapters.supports_upload(a.kind))
        .map(|account| UploadChoice {
            choice: AccountChoice::Account(account.key()),
            label: format!("{} ({})", account.label(), account.kind),
        })
        .collect();
    choices.push(UploadChoice {
        choice: AccountChoice::MostFreeSpace,
        label: "Account with most free space".to_string(),
    });
    choices
}

pub fn resolve_choice(
    store: &TokenStore,
    adapters: &AdapterSet,
    choice: &AccountChoice,
) -> Result<AccountSession, ProviderError> {
    let account = match choice {
        AccountChoice::Account(key) => store
            .account(key)
            .ok_or_else(|| ProviderError::NotConnected(key.clone()))?,
        AccountChoice::MostFreeSpace => store
            .account_with_most_free_space_where(|a| adapters.supports_upload(a.kind))
            .ok_or(ProviderError::NoAccountConnected)?,
    };
    if !adapters.supports_upload(account.kind) {
        return Err(ProviderError::NotSupported(format!("{} upload", account.kind)));
    }
    Ok(account.session())
}

/// Run an upload against one account.
///
/// A single file either succeeds or fails. A folder tree reports partial
/// success as `Ok`; only a tree where nothing made it is an error.
pub async fn perform_upload(
    adapter: &dyn CloudAdapter,
    session: &AccountSession,
    parent: Option<&str>,
    payload: &UploadPayload,
) -> Result<UploadReport, ProviderError> {
    match payload {
        UploadPayload::File(file) => {
            adapter
                .upload_file(session, parent, file)
                .await
                .map_err(ProviderError::into_upload_failure)?;
            let mut report = UploadReport::default();
            report.record_success();
            Ok(report)
        }
        UploadPayload::FolderTree(files) => {
            if files.is_empty() {
                return Err(ProviderError::UploadFailed {
                    reason: "the folder is empty".to_string(),
                    uploaded: 0,
                    failed: 0,
                });
            }
            let report = adapter.upload_folder_tree(session, parent, files).await;
            info!("Folder upload to {}: {}", session.owner, report.summary());
            if report.uploaded == 0 {
                return Err(ProviderError::UploadFailed {
                    reason: report
                        .errors
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "no file was uploaded".to_string()),
                    uploaded: 0,
                    failed: report.failed,
                });
            }
            Ok(report)
        }
    }
}

/// Session for deleting an entry of `owner`.
///
/// The owning account is used when it is still connected. Otherwise the first
/// connected account of the same provider is tried, since a token of another
/// provider can never authorize the call.
pub fn resolve_delete_session(store: &TokenStore, owner: &AccountKey) -> Result<AccountSession, ProviderError> {
    if let Some(account) = store.account(owner) {
        return Ok(account.session());
    }
    match store.first_of_kind(owner.kind) {
        Some(account) => {
            warn!("{} is gone, deleting with {}", owner, account.key());
            Ok(account.session())
        }
        None => Err(ProviderError::NoAccountConnected),
    }
}

pub async fn delete_entry(
    adapter: &dyn CloudAdapter,
    session: &AccountSession,
    entry: &RemoteEntry,
) -> Result<DeleteOutcome, ProviderError> {
    let outcome = adapter.delete_or_trash(session, &entry.id).await?;
    match outcome {
        DeleteOutcome::Deleted => info!("Deleted {} from {}", entry.name, session.owner),
        DeleteOutcome::Trashed => info!("Moved {} to the trash of {}", entry.name, session.owner),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::providers::{DropboxAdapter, ProviderKind, StorageQuota};
    use std::sync::Arc;

    fn store() -> TokenStore {
        let mut store = TokenStore::new();
        store.upsert_account(
            Account::new(ProviderKind::Google, "a@gmail.com", "ta")
                .with_display_name("Ann")
                .with_quota(StorageQuota { limit_bytes: Some(100), usage_bytes: Some(90) }),
        );
        store.upsert_account(
            Account::new(ProviderKind::OneDrive, "b@outlook.com", "tb")
                .with_quota(StorageQuota { limit_bytes: Some(1000), usage_bytes: Some(10) }),
        );
        store
    }

    fn adapters() -> AdapterSet {
        AdapterSet::from_config(&AppConfig::default()).unwrap()
    }

    /// Dropbox with unknown quota, which would otherwise count as unlimited.
    fn store_with_dropbox() -> TokenStore {
        let mut store = store();
        store.upsert_account(Account::new(ProviderKind::Dropbox, "dbid:1", "td"));
        store
    }

    #[test]
    fn test_no_candidates() {
        assert!(matches!(
            upload_candidates(&TokenStore::new(), &adapters()),
            Err(ProviderError::NoAccountConnected)
        ));
        assert_eq!(upload_candidates(&store(), &adapters()).unwrap().len(), 2);
    }

    #[test]
    fn test_account_choices() {
        let choices = account_choices(&store(), &adapters());
        assert_eq!(choices.len(), 3);
        assert_eq!(choices[0].label, "Ann • a@gmail.com (Google Drive)");
        assert_eq!(choices[1].label, "b@outlook.com (OneDrive)");
        assert_eq!(choices[2].choice, AccountChoice::MostFreeSpace);
    }

    #[test]
    fn test_resolve_most_free_space() {
        let session = resolve_choice(&store(), &adapters(), &AccountChoice::MostFreeSpace).unwrap();
        assert_eq!(session.owner, AccountKey::new(ProviderKind::OneDrive, "b@outlook.com"));

        let gone = AccountKey::new(ProviderKind::Google, "gone");
        assert!(matches!(
            resolve_choice(&store(), &adapters(), &AccountChoice::Account(gone)),
            Err(ProviderError::NotConnected(_))
        ));
    }

    #[test]
    fn test_accounts_without_upload_are_never_targets() {
        let store = store_with_dropbox();
        let adapters = adapters();
        let dropbox = AccountKey::new(ProviderKind::Dropbox, "dbid:1");

        assert_eq!(upload_candidates(&store, &adapters).unwrap().len(), 2);
        assert!(account_choices(&store, &adapters)
            .iter()
            .all(|c| c.choice != AccountChoice::Account(dropbox.clone())));

        let session = resolve_choice(&store, &adapters, &AccountChoice::MostFreeSpace).unwrap();
        assert_eq!(session.owner.kind, ProviderKind::OneDrive);
        assert!(matches!(
            resolve_choice(&store, &adapters, &AccountChoice::Account(dropbox)),
            Err(ProviderError::NotSupported(_))
        ));
    }

    #[test]
    fn test_only_dropbox_connected_is_no_account() {
        let mut store = TokenStore::new();
        store.upsert_account(Account::new(ProviderKind::Dropbox, "dbid:1", "td"));
        let adapters = AdapterSet::new().with(Arc::new(DropboxAdapter::new()));

        assert!(matches!(
            upload_candidates(&store, &adapters),
            Err(ProviderError::NoAccountConnected)
        ));
        assert!(matches!(
            resolve_choice(&store, &adapters, &AccountChoice::MostFreeSpace),
            Err(ProviderError::NoAccountConnected)
        ));
    }

    #[test]
    fn test_resolve_delete_session() {
        let store = store();
        let owner = AccountKey::new(ProviderKind::Google, "a@gmail.com");
        assert_eq!(resolve_delete_session(&store, &owner).unwrap().owner, owner);

        // owner signed out: first connected account of the same provider
        let gone = AccountKey::new(ProviderKind::Google, "old@gmail.com");
        assert_eq!(resolve_delete_session(&store, &gone).unwrap().owner, owner);

        let dropbox = AccountKey::new(ProviderKind::Dropbox, "x");
        assert!(matches!(
            resolve_delete_session(&store, &dropbox),
            Err(ProviderError::NoAccountConnected)
        ));
    }
}
