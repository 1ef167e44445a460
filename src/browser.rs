//! Drive browser - the aggregated multi-account file view
//!
//! `DriveBrowser` ties the token store, the provider adapters, the folder
//! navigator and the merged collection together. Every navigation produces a
//! `FetchTicket`; the listing is fetched by a `ListingFetcher` (which only
//! borrows shared handles, so it can run on a spawned task) and applied back
//! with `apply()`, which drops results for tickets that are no longer current.

use futures_util::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::aggregation::{AccountFilter, FileCollection, FileQuery};
use crate::config::AppConfig;
use crate::credentials::{load_saved_accounts, save_saved_accounts, CredentialPersistence, SavedAccount};
use crate::navigation::{FetchScope, FetchTicket, FolderBreadcrumb, FolderNavigator, NavState};
use crate::orchestrator::{
    self, account_choices, resolve_choice, resolve_delete_session, upload_candidates, AccountChoice,
    PendingUpload, UploadDecision, UploadPayload,
};
use crate::providers::oauth2::ExchangerSet;
use crate::providers::{
    Account, AccountIdentity, AccountKey, AccountSession, AdapterSet, DeleteOutcome, EntryKey,
    ListingPage, ProviderError, ProviderKind, RemoteEntry, TokenExchanger, TokenSet, UploadReport,
    ROOT_FOLDER_ID,
};
use crate::token_store::{SharedTokenStore, TokenStore};

/// Listing results for one ticket
#[derive(Debug)]
pub struct FetchOutcome {
    pub ticket: FetchTicket,
    pub results: Vec<(AccountKey, Result<ListingPage, ProviderError>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Results were merged; `failures` accounts could not be listed
    Applied { failures: usize },
    /// The user navigated elsewhere while the listing was in flight
    Stale,
}

/// Next-page request for one account, issued by `DriveBrowser::load_more_ticket`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMoreTicket {
    pub generation: u64,
    pub account: AccountKey,
    pub folder_id: String,
    pub continuation: String,
}

/// Fetches listings without borrowing the browser
#[derive(Clone)]
pub struct ListingFetcher {
    store: SharedTokenStore,
    adapters: AdapterSet,
}

impl ListingFetcher {
    pub fn new(store: SharedTokenStore, adapters: AdapterSet) -> Self {
        Self { store, adapters }
    }

    /// List the ticket's scope. At the root every account is listed
    /// concurrently and the call returns once all of them settled.
    pub async fn fetch(&self, ticket: FetchTicket) -> FetchOutcome {
        let (sessions, missing) = {
            let store = self.store.read().await;
            match &ticket.scope {
                FetchScope::Aggregated => (
                    store.accounts().iter().map(Account::session).collect::<Vec<_>>(),
                    None,
                ),
                FetchScope::Scoped { account, .. } => match store.account(account) {
                    Some(acc) => (vec![acc.session()], None),
                    None => (Vec::new(), Some(account.clone())),
                },
            }
        };

        if let Some(account) = missing {
            return FetchOutcome {
                ticket,
                results: vec![(account.clone(), Err(ProviderError::NotConnected(account)))],
            };
        }

        let scope = &ticket.scope;
        let fetches = sessions.iter().map(|session| async move {
            let folder = scope.folder_for(&session.owner).unwrap_or(ROOT_FOLDER_ID);
            let result = match self.adapters.get(session.owner.kind) {
                Ok(adapter) => adapter.list_folder(session, folder, None).await,
                Err(e) => Err(e),
            };
            (session.owner.clone(), result)
        });
        let results = join_all(fetches).await;

        FetchOutcome { ticket, results }
    }

    /// Fetch the page a `LoadMoreTicket` points at.
    pub async fn fetch_more(&self, ticket: &LoadMoreTicket) -> Result<ListingPage, ProviderError> {
        let session = self
            .store
            .read()
            .await
            .account(&ticket.account)
            .map(Account::session)
            .ok_or_else(|| ProviderError::NotConnected(ticket.account.clone()))?;
        let adapter = self.adapters.get(ticket.account.kind)?;
        adapter
            .list_folder(&session, &ticket.folder_id, Some(&ticket.continuation))
            .await
    }
}

/// Multi-account browsing session
pub struct DriveBrowser {
    store: SharedTokenStore,
    adapters: AdapterSet,
    navigator: FolderNavigator,
    collection: FileCollection,
    query: FileQuery,
    last_error: Option<String>,
    pending_upload: Option<PendingUpload>,
}

impl DriveBrowser {
    pub fn new(store: SharedTokenStore, adapters: AdapterSet) -> Self {
        Self {
            store,
            adapters,
            navigator: FolderNavigator::new(),
            collection: FileCollection::new(),
            query: FileQuery::default(),
            last_error: None,
            pending_upload: None,
        }
    }

    /// Browser with production adapters and an empty token store.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(TokenStore::new().shared(), AdapterSet::from_config(config)?))
    }

    pub fn store(&self) -> SharedTokenStore {
        self.store.clone()
    }

    pub fn fetcher(&self) -> ListingFetcher {
        ListingFetcher::new(self.store.clone(), self.adapters.clone())
    }

    pub fn state(&self) -> NavState {
        self.navigator.state()
    }

    pub fn breadcrumbs(&self) -> &[FolderBreadcrumb] {
        self.navigator.breadcrumbs()
    }

    pub fn navigator(&self) -> &FolderNavigator {
        &self.navigator
    }

    pub fn collection(&self) -> &FileCollection {
        &self.collection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn pending_upload(&self) -> Option<&PendingUpload> {
        self.pending_upload.as_ref()
    }

    pub async fn account_keys(&self) -> Vec<AccountKey> {
        self.store.read().await.keys()
    }

    fn record<T>(&mut self, result: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if let Err(ref e) = result {
            self.last_error = Some(e.user_message());
        }
        result
    }

    // ============ Listing ============

    /// Merge a fetch into the collection, unless the user moved on.
    pub fn apply(&mut self, outcome: FetchOutcome) -> ApplyOutcome {
        let FetchOutcome { ticket, results } = outcome;
        if !self.navigator.is_current(ticket.generation) {
            debug!(
                "Dropping listing for generation {} (current {})",
                ticket.generation,
                self.navigator.generation()
            );
            return ApplyOutcome::Stale;
        }

        if ticket.fresh_target {
            self.collection.clear();
        }
        let listed: Vec<AccountKey> = results.iter().map(|(key, _)| key.clone()).collect();
        self.collection.retain_accounts(&listed);

        let mut first_error: Option<ProviderError> = None;
        let mut failures = 0;
        for (key, result) in results {
            match result {
                Ok(page) => self.collection.replace_account(&key, page),
                Err(ProviderError::NotSupported(reason)) => {
                    debug!("{} has no listing: {}", key, reason);
                    self.collection.drop_account(&key);
                }
                Err(e) => {
                    // previous entries of this account stay visible
                    warn!("Listing {} failed: {}", key, e);
                    failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        self.last_error = first_error.map(|e| e.user_message());
        ApplyOutcome::Applied { failures }
    }

    async fn run(&mut self, ticket: FetchTicket) -> ApplyOutcome {
        let outcome = self.fetcher().fetch(ticket).await;
        self.apply(outcome)
    }

    pub async fn reload(&mut self) -> ApplyOutcome {
        let ticket = self.navigator.refresh();
        self.run(ticket).await
    }

    pub async fn enter_folder(&mut self, key: &EntryKey) -> Result<ApplyOutcome, ProviderError> {
        let entry = self
            .collection
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(key.id.clone()));
        let entry = self.record(entry)?;
        let ticket = self.navigator.enter_folder(&entry);
        let ticket = self.record(ticket)?;
        Ok(self.run(ticket).await)
    }

    pub async fn jump_to_root(&mut self) -> ApplyOutcome {
        let ticket = self.navigator.jump_to_root();
        self.run(ticket).await
    }

    pub async fn jump_to_breadcrumb(&mut self, index: usize) -> Result<ApplyOutcome, ProviderError> {
        let ticket = self.navigator.jump_to_breadcrumb(index);
        let ticket = self.record(ticket)?;
        Ok(self.run(ticket).await)
    }

    pub async fn go_back(&mut self) -> ApplyOutcome {
        let ticket = self.navigator.go_back();
        self.run(ticket).await
    }

    /// Ticket for the next page of `account`, or `None` when it is complete.
    pub fn load_more_ticket(&mut self, account: &AccountKey) -> Result<Option<LoadMoreTicket>, ProviderError> {
        let Some(continuation) = self.collection.continuation(account).map(str::to_string) else {
            return Ok(None);
        };
        let scope = self.navigator.current_scope();
        let folder = scope
            .folder_for(account)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidNavigation(format!("{} is not in view", account)));
        let folder_id = self.record(folder)?;
        Ok(Some(LoadMoreTicket {
            generation: self.navigator.generation(),
            account: account.clone(),
            folder_id,
            continuation,
        }))
    }

    /// Append a fetched page; returns how many entries were added. A page for
    /// a view the user already left is dropped.
    pub fn apply_more(
        &mut self,
        ticket: LoadMoreTicket,
        page: Result<ListingPage, ProviderError>,
    ) -> Result<usize, ProviderError> {
        if !self.navigator.is_current(ticket.generation) {
            debug!("Dropping stale page for {}", ticket.account);
            return Ok(0);
        }
        let page = self.record(page)?;
        let added = page.entries.len();
        self.collection.append_page(&ticket.account, page);
        Ok(added)
    }

    /// Fetch the next page of `account`; returns how many entries were added.
    pub async fn load_more(&mut self, account: &AccountKey) -> Result<usize, ProviderError> {
        let Some(ticket) = self.load_more_ticket(account)? else {
            return Ok(0);
        };
        let page = self.fetcher().fetch_more(&ticket).await;
        self.apply_more(ticket, page)
    }

    pub fn set_query(&mut self, query: FileQuery) {
        self.query = query;
    }

    pub fn query(&self) -> &FileQuery {
        &self.query
    }

    pub fn visible_entries(&self) -> Vec<RemoteEntry> {
        self.collection.view(&self.query)
    }

    // ============ Accounts ============

    async fn session_for(&self, key: &AccountKey) -> Result<AccountSession, ProviderError> {
        self.store
            .read()
            .await
            .account(key)
            .map(Account::session)
            .ok_or_else(|| ProviderError::NotConnected(key.clone()))
    }

    /// Resolve identity and quota for fresh tokens and store the account.
    async fn add_account(&mut self, kind: ProviderKind, tokens: TokenSet) -> Result<AccountKey, ProviderError> {
        let adapter = self.record(self.adapters.get(kind))?;

        let identity = match adapter.get_identity(&tokens.access_token).await {
            Ok(identity) => identity,
            Err(e @ ProviderError::AuthExpired(_)) => return self.record(Err(e)),
            Err(e) => {
                let account_id = tokens
                    .account_hint
                    .clone()
                    .unwrap_or_else(|| format!("anon-{}", chrono::Utc::now().timestamp_millis()));
                warn!("Identity lookup for {} failed ({}), using {}", kind, e, account_id);
                AccountIdentity {
                    account_id,
                    display_name: None,
                }
            }
        };

        let quota = match adapter.get_quota(&tokens.access_token).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!("Quota lookup for {} failed: {}", identity.account_id, e);
                Default::default()
            }
        };

        let account = Account {
            kind,
            account_id: identity.account_id,
            display_name: identity.display_name,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_expires_at: tokens.expires_at,
            storage_limit_bytes: None,
            storage_usage_bytes: None,
        }
        .with_quota(quota);
        let key = account.key();
        self.store.write().await.upsert_account(account);
        Ok(key)
    }

    /// Add (or re-authenticate) an account, then show the aggregated root.
    pub async fn connect_account(&mut self, kind: ProviderKind, tokens: TokenSet) -> Result<AccountKey, ProviderError> {
        let key = self.add_account(kind, tokens).await?;
        info!("Connected {}", key);
        self.jump_to_root().await;
        Ok(key)
    }

    pub async fn sign_out(&mut self, key: &AccountKey) -> Result<(), ProviderError> {
        let removed = self.store.write().await.remove_account(key);
        if removed.is_none() {
            return self.record(Err(ProviderError::NotConnected(key.clone())));
        }
        self.collection.drop_account(key);
        if let Some(ticket) = self.navigator.reset_for_removed_account(key) {
            self.run(ticket).await;
        }
        if let AccountFilter::Only(filtered) = &self.query.account {
            if filtered == key {
                self.query.account = AccountFilter::All;
            }
        }
        info!("Signed out {}", key);
        Ok(())
    }

    /// Swap in a fresh access token for `key` using its refresh token.
    pub async fn refresh_account_token(
        &mut self,
        key: &AccountKey,
        exchanger: &dyn TokenExchanger,
    ) -> Result<(), ProviderError> {
        let refresh_token = {
            let store = self.store.read().await;
            match store.account(key) {
                Some(account) => account.refresh_token.clone().ok_or_else(|| {
                    ProviderError::AuthenticationFailed(format!("{} has no refresh token", key))
                }),
                None => Err(ProviderError::NotConnected(key.clone())),
            }
        };
        let refresh_token = self.record(refresh_token)?;

        let tokens = exchanger.refresh(&refresh_token).await;
        let tokens = self.record(tokens)?;
        let updated = self.store.write().await.update_tokens(key, tokens);
        self.record(updated)?;
        info!("Refreshed token of {}", key);
        Ok(())
    }

    /// Persist the refresh tokens of every account that has one.
    pub async fn remember_sessions(&mut self, persist: &dyn CredentialPersistence) -> Result<usize, ProviderError> {
        let saved: Vec<SavedAccount> = {
            let store = self.store.read().await;
            store
                .accounts()
                .iter()
                .filter_map(|a| {
                    a.refresh_token.as_ref().map(|rt| SavedAccount {
                        kind: a.kind,
                        account_id: a.account_id.clone(),
                        refresh_token: rt.expose_secret().to_string(),
                    })
                })
                .collect()
        };
        let result = save_saved_accounts(persist, &saved).map_err(|e| ProviderError::Credentials(e.to_string()));
        self.record(result)?;
        debug!("Remembered {} account(s)", saved.len());
        Ok(saved.len())
    }

    /// Silent re-login from remembered refresh tokens. Accounts whose refresh
    /// fails are skipped; returns how many were restored.
    pub async fn restore_sessions(
        &mut self,
        persist: &dyn CredentialPersistence,
        exchangers: &ExchangerSet,
    ) -> Result<usize, ProviderError> {
        let saved = load_saved_accounts(persist).map_err(|e| ProviderError::Credentials(e.to_string()));
        let saved = self.record(saved)?;

        let mut restored = 0;
        for account in saved {
            let Some(exchanger) = exchangers.get(&account.kind) else {
                warn!("No token exchanger for {}, skipping {}", account.kind, account.account_id);
                continue;
            };
            let refresh_token = SecretString::from(account.refresh_token.clone());
            let mut tokens = match exchanger.refresh(&refresh_token).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!("Could not restore {}: {}", account.key(), e);
                    continue;
                }
            };
            tokens.refresh_token.get_or_insert(refresh_token);
            tokens.account_hint.get_or_insert(account.account_id.clone());

            match self.add_account(account.kind, tokens).await {
                Ok(key) => {
                    debug!("Restored {}", key);
                    restored += 1;
                }
                Err(e) => warn!("Could not restore {}: {}", account.key(), e),
            }
        }

        if restored > 0 {
            self.jump_to_root().await;
        }
        info!("Restored {} session(s)", restored);
        Ok(restored)
    }

    // ============ Uploads ============

    /// Upload right away when one account can take it; otherwise park the
    /// payload and ask which account to use.
    pub async fn request_upload(&mut self, payload: UploadPayload) -> Result<UploadDecision, ProviderError> {
        let store = self.store.clone();
        let single = {
            let store = store.read().await;
            let candidates = upload_candidates(&store, &self.adapters);
            let candidates = self.record(candidates)?;
            if let [only] = candidates.as_slice() {
                store.account(only).map(Account::session)
            } else {
                let choices = account_choices(&store, &self.adapters);
                self.pending_upload = Some(PendingUpload {
                    payload: payload.clone(),
                    choices: choices.clone(),
                });
                return Ok(UploadDecision::ChooseAccount(choices));
            }
        };

        let session = self.record(single.ok_or(ProviderError::NoAccountConnected))?;
        let report = self.upload_to(session, &payload).await?;
        Ok(UploadDecision::Completed(report))
    }

    /// Resume a parked upload with the picked account.
    pub async fn choose_upload_account(&mut self, choice: &AccountChoice) -> Result<UploadReport, ProviderError> {
        let pending = self
            .pending_upload
            .take()
            .ok_or_else(|| ProviderError::NotFound("no upload is waiting for an account".to_string()));
        let pending = self.record(pending)?;

        let session = resolve_choice(&*self.store.read().await, &self.adapters, choice);
        let session = self.record(session)?;
        self.upload_to(session, &pending.payload).await
    }

    pub fn cancel_pending_upload(&mut self) -> Option<PendingUpload> {
        self.pending_upload.take()
    }

    async fn upload_to(&mut self, session: AccountSession, payload: &UploadPayload) -> Result<UploadReport, ProviderError> {
        let adapter = self.record(self.adapters.get(session.owner.kind))?;
        let parent = self.navigator.upload_parent_for(&session.owner).map(str::to_string);
        info!(
            "Uploading {} file(s) to {} ({})",
            payload.file_count(),
            session.owner,
            parent.as_deref().unwrap_or("root")
        );

        let result = orchestrator::perform_upload(adapter.as_ref(), &session, parent.as_deref(), payload).await;
        let report = self.record(result)?;

        self.reload().await;
        if report.failed > 0 {
            self.last_error = Some(report.summary());
        }
        Ok(report)
    }

    // ============ Delete & download ============

    fn entry(&self, key: &EntryKey) -> Result<RemoteEntry, ProviderError> {
        self.collection
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(key.id.clone()))
    }

    /// Delete (or trash) on the provider; the collection is not touched.
    pub async fn delete_remote(&mut self, key: &EntryKey) -> Result<DeleteOutcome, ProviderError> {
        let entry = self.entry(key);
        let entry = self.record(entry)?;
        let session = resolve_delete_session(&*self.store.read().await, &entry.owner);
        let session = self.record(session)?;
        let adapter = self.record(self.adapters.get(entry.owner.kind))?;

        let outcome = orchestrator::delete_entry(adapter.as_ref(), &session, &entry).await;
        self.record(outcome)
    }

    /// Drop the entry locally without waiting for a re-fetch.
    pub fn apply_local_removal(&mut self, key: &EntryKey) -> bool {
        self.collection.remove_entry(key)
    }

    /// Delete, remove locally, then re-fetch the current scope.
    pub async fn request_delete(&mut self, key: &EntryKey) -> Result<DeleteOutcome, ProviderError> {
        let outcome = self.delete_remote(key).await?;
        self.apply_local_removal(key);
        self.reload().await;
        Ok(outcome)
    }

    pub async fn download_link(&mut self, key: &EntryKey) -> Result<String, ProviderError> {
        let entry = self.entry(key);
        let entry = self.record(entry)?;
        let session = self.session_for(&entry.owner).await;
        let session = self.record(session)?;
        let adapter = self.record(self.adapters.get(entry.owner.kind))?;

        let link = adapter.resolve_download(&session, &entry).await;
        self.record(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> DriveBrowser {
        DriveBrowser::new(TokenStore::new().shared(), AdapterSet::new())
    }

    fn key(id: &str) -> AccountKey {
        AccountKey::new(ProviderKind::Google, id)
    }

    fn page(owner: &AccountKey, ids: &[&str]) -> ListingPage {
        ListingPage::complete(
            ids.iter()
                .map(|id| RemoteEntry::file(owner.clone(), *id, format!("{}.txt", id)))
                .collect(),
        )
    }

    #[test]
    fn test_stale_outcome_is_dropped() {
        let mut b = browser();
        let old = b.navigator.jump_to_root();
        let current = b.navigator.refresh();

        let stale = FetchOutcome {
            ticket: old,
            results: vec![(key("a"), Ok(page(&key("a"), &["1"])))],
        };
        assert_eq!(b.apply(stale), ApplyOutcome::Stale);
        assert!(b.collection().is_empty());

        let fresh = FetchOutcome {
            ticket: current,
            results: vec![(key("a"), Ok(page(&key("a"), &["1", "2"])))],
        };
        assert_eq!(b.apply(fresh), ApplyOutcome::Applied { failures: 0 });
        assert_eq!(b.visible_entries().len(), 2);
    }

    #[test]
    fn test_refresh_failure_keeps_entries() {
        let mut b = browser();
        let ticket = b.navigator.refresh();
        b.apply(FetchOutcome {
            ticket,
            results: vec![(key("a"), Ok(page(&key("a"), &["1"])))],
        });

        let ticket = b.navigator.refresh();
        let applied = b.apply(FetchOutcome {
            ticket,
            results: vec![(key("a"), Err(ProviderError::Network("offline".into())))],
        });
        assert_eq!(applied, ApplyOutcome::Applied { failures: 1 });
        assert_eq!(b.visible_entries().len(), 1);
        assert!(b.last_error().unwrap().contains("offline"));
    }

    #[test]
    fn test_unsupported_provider_is_silent() {
        let mut b = browser();
        let ticket = b.navigator.refresh();
        let dropbox = AccountKey::new(ProviderKind::Dropbox, "d");
        let applied = b.apply(FetchOutcome {
            ticket,
            results: vec![
                (key("a"), Ok(page(&key("a"), &["1"]))),
                (dropbox, Err(ProviderError::NotSupported("Dropbox listing".into()))),
            ],
        });
        assert_eq!(applied, ApplyOutcome::Applied { failures: 0 });
        assert!(b.last_error().is_none());
        assert_eq!(b.collection().accounts_present(), vec![key("a")]);
    }

    #[tokio::test]
    async fn test_upload_without_accounts() {
        let mut b = browser();
        let payload = UploadPayload::File(crate::providers::UploadFile::new("a.txt", b"a".to_vec()));
        assert!(matches!(
            b.request_upload(payload).await,
            Err(ProviderError::NoAccountConnected)
        ));
        assert_eq!(b.last_error(), Some("Connect an account first."));
    }
}
