//! Connected accounts and their tokens
//!
//! The store is the single owner of `Account` values. Everything else refers
//! to an account by `AccountKey` and asks the store for a token right before
//! each call.

use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::providers::{Account, AccountKey, ProviderError, ProviderKind, TokenSet};

/// Store handle shared between the browser and spawned fetches
pub type SharedTokenStore = Arc<RwLock<TokenStore>>;

/// Accounts in connection order
#[derive(Debug, Default, Clone)]
pub struct TokenStore {
    accounts: Vec<Account>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedTokenStore {
        Arc::new(RwLock::new(self))
    }

    /// Insert an account, or replace the one with the same key where it sits.
    pub fn upsert_account(&mut self, account: Account) {
        let key = account.key();
        match self.accounts.iter_mut().find(|a| a.key() == key) {
            Some(existing) => {
                debug!("Replacing tokens of {}", key);
                *existing = account;
            }
            None => {
                info!("Account connected: {}", key);
                self.accounts.push(account);
            }
        }
    }

    pub fn remove_account(&mut self, key: &AccountKey) -> Option<Account> {
        let index = self.accounts.iter().position(|a| &a.key() == key)?;
        info!("Account removed: {}", key);
        Some(self.accounts.remove(index))
    }

    pub fn token_for(&self, kind: ProviderKind, account_id: &str) -> Result<SecretString, ProviderError> {
        self.accounts
            .iter()
            .find(|a| a.kind == kind && a.account_id == account_id)
            .map(|a| a.access_token.clone())
            .ok_or_else(|| ProviderError::NotConnected(AccountKey::new(kind, account_id)))
    }

    /// Account with the most free space. Unknown or negative limits count as
    /// unlimited; on a tie the earlier account wins.
    pub fn account_with_most_free_space(&self) -> Option<&Account> {
        self.account_with_most_free_space_where(|_| true)
    }

    /// Same as `account_with_most_free_space`, among accounts passing `eligible`.
    pub fn account_with_most_free_space_where<F>(&self, eligible: F) -> Option<&Account>
    where
        F: Fn(&Account) -> bool,
    {
        self.accounts
            .iter()
            .filter(|&a| eligible(a))
            .fold(None, |best: Option<&Account>, candidate| match best {
                Some(b) if b.free_space() >= candidate.free_space() => Some(b),
                _ => Some(candidate),
            })
    }

    /// Swap in refreshed tokens. A missing refresh token keeps the old one.
    pub fn update_tokens(&mut self, key: &AccountKey, tokens: TokenSet) -> Result<(), ProviderError> {
        let account = self
            .accounts
            .iter_mut()
            .find(|a| &a.key() == key)
            .ok_or_else(|| ProviderError::NotConnected(key.clone()))?;
        account.access_token = tokens.access_token;
        if tokens.refresh_token.is_some() {
            account.refresh_token = tokens.refresh_token;
        }
        account.token_expires_at = tokens.expires_at;
        Ok(())
    }

    pub fn account(&self, key: &AccountKey) -> Option<&Account> {
        self.accounts.iter().find(|a| &a.key() == key)
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn keys(&self) -> Vec<AccountKey> {
        self.accounts.iter().map(Account::key).collect()
    }

    pub fn first(&self) -> Option<&Account> {
        self.accounts.first()
    }

    pub fn first_of_kind(&self, kind: ProviderKind) -> Option<&Account> {
        self.accounts.iter().find(|a| a.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
