//! Merged file collection across accounts
//!
//! Listings are stored per account so one account can be re-fetched, paged or
//! dropped without touching the others. `view()` produces the filtered and
//! sorted list the UI shows.

use std::cmp::Ordering;
use std::fmt;

use crate::providers::{AccountKey, EntryKey, ListingPage, RemoteEntry};

/// Coarse file category for the type filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Document,
    Spreadsheet,
    Presentation,
    Image,
    Video,
    Pdf,
    Folder,
    Other,
}

impl TypeCategory {
    pub const ALL: [TypeCategory; 8] = [
        TypeCategory::Document,
        TypeCategory::Spreadsheet,
        TypeCategory::Presentation,
        TypeCategory::Image,
        TypeCategory::Video,
        TypeCategory::Pdf,
        TypeCategory::Folder,
        TypeCategory::Other,
    ];

    /// First matching rule wins. MIME types are lowercase, so the hint is
    /// matched as is.
    pub fn classify(hint: Option<&str>) -> Self {
        let Some(hint) = hint else {
            return TypeCategory::Other;
        };
        let has = |needle: &str| hint.contains(needle);

        if has("document") || has("word") {
            TypeCategory::Document
        } else if has("spreadsheet") || has("excel") {
            TypeCategory::Spreadsheet
        } else if has("presentation") || has("powerpoint") {
            TypeCategory::Presentation
        } else if has("image") || has("photo") {
            TypeCategory::Image
        } else if has("video") {
            TypeCategory::Video
        } else if has("pdf") {
            TypeCategory::Pdf
        } else if has("folder") {
            TypeCategory::Folder
        } else {
            TypeCategory::Other
        }
    }

    pub fn of(entry: &RemoteEntry) -> Self {
        Self::classify(entry.mime_type.as_deref())
    }

    pub fn label(&self) -> &'static str {
        match self {
            TypeCategory::Document => "Documents",
            TypeCategory::Spreadsheet => "Spreadsheets",
            TypeCategory::Presentation => "Presentations",
            TypeCategory::Image => "Photos & images",
            TypeCategory::Video => "Videos",
            TypeCategory::Pdf => "PDFs",
            TypeCategory::Folder => "Folders",
            TypeCategory::Other => "Other",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccountFilter {
    #[default]
    All,
    Only(AccountKey),
}

/// Search, account and type filters applied by `FileCollection::view`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    /// Case-insensitive substring of the name; empty matches everything
    pub search: String,
    pub account: AccountFilter,
    pub category: Option<TypeCategory>,
}

impl FileQuery {
    pub fn matches(&self, entry: &RemoteEntry) -> bool {
        let needle = self.search.to_lowercase();
        if !needle.is_empty() && !entry.name.to_lowercase().contains(&needle) {
            return false;
        }
        if let AccountFilter::Only(key) = &self.account {
            if &entry.owner != key {
                return false;
            }
        }
        match self.category {
            Some(category) => TypeCategory::of(entry) == category,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
struct AccountListing {
    account: AccountKey,
    entries: Vec<RemoteEntry>,
    continuation: Option<String>,
}

/// Entries grouped per account, in first-insertion order
#[derive(Debug, Clone, Default)]
pub struct FileCollection {
    groups: Vec<AccountListing>,
}

impl FileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_mut(&mut self, account: &AccountKey) -> &mut AccountListing {
        let index = match self.groups.iter().position(|g| &g.account == account) {
            Some(index) => index,
            None => {
                self.groups.push(AccountListing {
                    account: account.clone(),
                    entries: Vec::new(),
                    continuation: None,
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }

    /// Replace one account's entries and cursor; other accounts are untouched.
    pub fn replace_account(&mut self, account: &AccountKey, page: ListingPage) {
        let group = self.group_mut(account);
        group.entries = page.entries;
        group.continuation = page.continuation;
    }

    /// Append a "load more" page.
    pub fn append_page(&mut self, account: &AccountKey, page: ListingPage) {
        let group = self.group_mut(account);
        group.entries.extend(page.entries);
        group.continuation = page.continuation;
    }

    /// Optimistic local removal after a delete; returns whether it was present.
    pub fn remove_entry(&mut self, key: &EntryKey) -> bool {
        let Some(group) = self.groups.iter_mut().find(|g| g.account == key.owner) else {
            return false;
        };
        let before = group.entries.len();
        group.entries.retain(|e| e.id != key.id);
        group.entries.len() != before
    }

    pub fn drop_account(&mut self, account: &AccountKey) {
        self.groups.retain(|g| &g.account != account);
    }

    pub fn retain_accounts(&mut self, keep: &[AccountKey]) {
        self.groups.retain(|g| keep.contains(&g.account));
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn get(&self, key: &EntryKey) -> Option<&RemoteEntry> {
        self.groups
            .iter()
            .find(|g| g.account == key.owner)?
            .entries
            .iter()
            .find(|e| e.id == key.id)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn continuation(&self, account: &AccountKey) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| &g.account == account)?
            .continuation
            .as_deref()
    }

    /// Accounts that currently contribute entries
    pub fn accounts_present(&self) -> Vec<AccountKey> {
        self.groups
            .iter()
            .filter(|g| !g.entries.is_empty())
            .map(|g| g.account.clone())
            .collect()
    }

    /// Filtered entries, folders first, then newest first.
    pub fn view(&self, query: &FileQuery) -> Vec<RemoteEntry> {
        let mut visible: Vec<RemoteEntry> = self
            .groups
            .iter()
            .flat_map(|g| g.entries.iter())
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        visible.sort_by(compare_entries);
        visible
    }
}

fn compare_entries(a: &RemoteEntry, b: &RemoteEntry) -> Ordering {
    b.is_folder
        .cmp(&a.is_folder)
        .then_with(|| b.modified_millis().cmp(&a.modified_millis()))
}
