// Unidrive - one merged view over several cloud drive accounts
// Library core: the UI layer drives it through `DriveBrowser`.

pub mod aggregation;
pub mod browser;
pub mod config;
pub mod credentials;
pub mod local_source;
pub mod navigation;
pub mod orchestrator;
pub mod providers;
pub mod token_store;

pub use aggregation::{AccountFilter, FileCollection, FileQuery, TypeCategory};
pub use browser::{ApplyOutcome, DriveBrowser, FetchOutcome, ListingFetcher, LoadMoreTicket};
pub use config::AppConfig;
pub use credentials::{CredentialPersistence, FileCredentials, MemoryCredentials, SavedAccount};
pub use navigation::{FetchScope, FetchTicket, FolderBreadcrumb, FolderNavigator, NavState};
pub use orchestrator::{AccountChoice, PendingUpload, UploadChoice, UploadDecision, UploadPayload};
pub use providers::{
    Account, AccountKey, AdapterSet, CloudAdapter, EntryKey, ProviderError, ProviderKind, RemoteEntry,
};
pub use token_store::{SharedTokenStore, TokenStore};

/// Install a fmt subscriber at `level` (error, warn, info, debug, trace).
/// Unknown levels fall back to info. Returns false when a global subscriber
/// was already set.
pub fn init_logging(level: &str) -> bool {
    let level = level
        .trim()
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}
