//! Folder navigation state machine
//!
//! At the root the view is aggregated over every account. Entering a folder
//! scopes the view to that folder's account; the breadcrumb stack never mixes
//! accounts. Each transition bumps a generation counter and hands back a
//! `FetchTicket`, so a listing that arrives after the user moved on can be
//! recognised and dropped.

use crate::providers::{AccountKey, ProviderError, RemoteEntry, ROOT_FOLDER_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderBreadcrumb {
    pub account: AccountKey,
    pub folder_id: String,
    pub folder_name: String,
}

/// What a fetch has to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Root of every connected account
    Aggregated,
    /// One folder of one account
    Scoped { account: AccountKey, folder_id: String },
}

impl FetchScope {
    /// Folder to list for `account`, or `None` when the scope excludes it.
    pub fn folder_for(&self, account: &AccountKey) -> Option<&str> {
        match self {
            FetchScope::Aggregated => Some(ROOT_FOLDER_ID),
            FetchScope::Scoped { account: scoped, folder_id } if scoped == account => Some(folder_id.as_str()),
            FetchScope::Scoped { .. } => None,
        }
    }
}

/// Issued by every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub scope: FetchScope,
    /// The scope differs from the previous ticket's: old entries must not be
    /// shown while the new listing loads or after it fails.
    pub fresh_target: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    AtRoot,
    InFolder,
}

#[derive(Debug, Clone)]
pub struct FolderNavigator {
    stack: Vec<FolderBreadcrumb>,
    generation: u64,
    last_scope: FetchScope,
}

impl Default for FolderNavigator {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            generation: 0,
            last_scope: FetchScope::Aggregated,
        }
    }
}

impl FolderNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NavState {
        if self.stack.is_empty() {
            NavState::AtRoot
        } else {
            NavState::InFolder
        }
    }

    pub fn breadcrumbs(&self) -> &[FolderBreadcrumb] {
        &self.stack
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn current_scope(&self) -> FetchScope {
        match self.stack.last() {
            None => FetchScope::Aggregated,
            Some(top) => FetchScope::Scoped {
                account: top.account.clone(),
                folder_id: top.folder_id.clone(),
            },
        }
    }

    /// Drill into `entry`. A folder from another account starts a new stack.
    pub fn enter_folder(&mut self, entry: &RemoteEntry) -> Result<FetchTicket, ProviderError> {
        if !entry.is_folder {
            return Err(ProviderError::InvalidNavigation(format!("{} is not a folder", entry.name)));
        }
        if self.stack.last().is_some_and(|top| top.account != entry.owner) {
            self.stack.clear();
        }
        self.stack.push(FolderBreadcrumb {
            account: entry.owner.clone(),
            folder_id: entry.id.clone(),
            folder_name: entry.name.clone(),
        });
        Ok(self.issue())
    }

    pub fn jump_to_root(&mut self) -> FetchTicket {
        self.stack.clear();
        self.issue()
    }

    /// Keep breadcrumbs `0..=index`.
    pub fn jump_to_breadcrumb(&mut self, index: usize) -> Result<FetchTicket, ProviderError> {
        if index >= self.stack.len() {
            return Err(ProviderError::InvalidNavigation(format!(
                "breadcrumb {} out of range ({} levels)",
                index,
                self.stack.len()
            )));
        }
        self.stack.truncate(index + 1);
        Ok(self.issue())
    }

    pub fn go_back(&mut self) -> FetchTicket {
        self.stack.pop();
        self.issue()
    }

    /// Re-fetch the current scope.
    pub fn refresh(&mut self) -> FetchTicket {
        self.issue()
    }

    /// Leave a folder of a signed-out account.
    pub fn reset_for_removed_account(&mut self, account: &AccountKey) -> Option<FetchTicket> {
        if self.stack.first().is_some_and(|b| &b.account == account) {
            Some(self.jump_to_root())
        } else {
            None
        }
    }

    /// Current folder id when it belongs to `account`; uploads elsewhere go to root.
    pub fn upload_parent_for(&self, account: &AccountKey) -> Option<&str> {
        self.stack
            .last()
            .filter(|top| &top.account == account)
            .map(|top| top.folder_id.as_str())
    }

    fn issue(&mut self) -> FetchTicket {
        self.generation += 1;
        let scope = self.current_scope();
        let fresh_target = scope != self.last_scope;
        self.last_scope = scope.clone();
        FetchTicket {
            generation: self.generation,
            scope,
            fresh_target,
        }
    }
}
