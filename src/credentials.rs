//! Credential persistence
//!
//! A minimal key/value contract (`get_item`, `set_item`, `remove_item`) that
//! secure storage backends implement. The browser keeps one record per
//! remembered account, the refresh token, so sessions can be restored silently
//! on the next start.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::providers::{AccountKey, ProviderKind};

/// Key under which remembered accounts are stored
pub const SAVED_ACCOUNTS_KEY: &str = "connected_accounts";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Credential store lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        CredentialError::Serialization(e.to_string())
    }
}

/// String key/value secure storage
pub trait CredentialPersistence: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, CredentialError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), CredentialError>;
    fn remove_item(&self, key: &str) -> Result<(), CredentialError>;
}

/// Remembered account: enough to refresh a session without user interaction
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAccount {
    pub kind: ProviderKind,
    pub account_id: String,
    pub refresh_token: String,
}

impl SavedAccount {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.kind, self.account_id.clone())
    }
}

impl fmt::Debug for SavedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedAccount")
            .field("kind", &self.kind)
            .field("account_id", &self.account_id)
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

pub fn load_saved_accounts(store: &dyn CredentialPersistence) -> Result<Vec<SavedAccount>, CredentialError> {
    match store.get_item(SAVED_ACCOUNTS_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

/// Overwrite the remembered accounts; an empty list removes the record.
pub fn save_saved_accounts(
    store: &dyn CredentialPersistence,
    accounts: &[SavedAccount],
) -> Result<(), CredentialError> {
    if accounts.is_empty() {
        return store.remove_item(SAVED_ACCOUNTS_KEY);
    }
    store.set_item(SAVED_ACCOUNTS_KEY, &serde_json::to_string(accounts)?)
}

/// In-memory store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialPersistence for MemoryCredentials {
    fn get_item(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let items = self.items.lock().map_err(|_| CredentialError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut items = self.items.lock().map_err(|_| CredentialError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), CredentialError> {
        let mut items = self.items.lock().map_err(|_| CredentialError::LockPoisoned)?;
        items.remove(key);
        Ok(())
    }
}

/// JSON file with owner-only permissions
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// File named by `credentials_file`, or the default next to the config.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.credentials_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(map)?)?;
        ensure_secure_permissions(&self.path)?;
        debug!("Credentials written to {:?}", self.path);
        Ok(())
    }
}

impl CredentialPersistence for FileCredentials {
    fn get_item(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        Ok(self.read_map()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove_item(&self, key: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
            info!("Credential {} removed", key);
        }
        Ok(())
    }
}

/// 0o600 on Unix
pub fn ensure_secure_permissions(path: &Path) -> Result<(), CredentialError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o700 } else { 0o600 };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(id: &str) -> SavedAccount {
        SavedAccount {
            kind: ProviderKind::Google,
            account_id: id.to_string(),
            refresh_token: format!("refresh-{}", id),
        }
    }

    #[test]
    fn test_memory_credentials() {
        let store = MemoryCredentials::new();
        assert_eq!(store.get_item("k").unwrap(), None);
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v"));
        store.remove_item("k").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_saved_accounts_round_trip_and_clear() {
        let store = MemoryCredentials::new();
        assert!(load_saved_accounts(&store).unwrap().is_empty());

        save_saved_accounts(&store, &[saved("a"), saved("b")]).unwrap();
        let loaded = load_saved_accounts(&store).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].key(), AccountKey::new(ProviderKind::Google, "b"));

        save_saved_accounts(&store, &[]).unwrap();
        assert_eq!(store.get_item(SAVED_ACCOUNTS_KEY).unwrap(), None);
    }

    #[test]
    fn test_debug_redacts_refresh_token() {
        let text = format!("{:?}", saved("a"));
        assert!(!text.contains("refresh-a"));
        assert!(text.contains("REDACTED"));
    }

    #[test]
    fn test_file_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentials::new(dir.path().join("sub").join("credentials.json"));
        assert_eq!(store.get_item("k").unwrap(), None);

        store.set_item("k", "v").unwrap();
        store.set_item("other", "w").unwrap();

        let reopened = FileCredentials::new(store.path().to_path_buf());
        assert_eq!(reopened.get_item("k").unwrap().as_deref(), Some("v"));
        reopened.remove_item("k").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
        assert_eq!(store.get_item("other").unwrap().as_deref(), Some("w"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_file_credentials_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remembered.json");
        let config = AppConfig {
            credentials_file: Some(path.clone()),
            ..Default::default()
        };
        let store = FileCredentials::from_config(&config);
        assert_eq!(store.path(), path.as_path());

        save_saved_accounts(&store, &[saved("a")]).unwrap();
        assert!(path.exists());

        let default = FileCredentials::from_config(&AppConfig::default());
        assert!(default.path().ends_with("unidrive/credentials.json"));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{oops").unwrap();
        let store = FileCredentials::new(path);
        assert!(matches!(store.get_item("k"), Err(CredentialError::Serialization(_))));
    }
}
