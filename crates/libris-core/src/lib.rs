//! Core library for libris - session management and resilient API transport.
//!
//! This crate maintains an authentication session against the libris
//! backend and routes every API call through a single client that attaches
//! credentials, renews expired tokens once for all waiting callers, and
//! retries transient failures.

pub mod api;
pub mod auth;
pub mod config;
pub mod events;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, SessionManager, SessionPhase, SessionState};
pub use config::{Config, StorageKind};
pub use events::{EventBus, SessionEvent};
pub use models::UserSnapshot;
pub use storage::{SharedStorage, StorageHandle};

use std::sync::Arc;

use storage::{FileBackend, KeyringBackend, MemoryBackend, StorageBackend};

/// Keychain service name for `StorageKind::Keyring`
const KEYRING_SERVICE: &str = "libris";

/// Open the storage backend selected by the config.
pub fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.storage {
        StorageKind::File => Arc::new(FileBackend::new(config.cache_dir()?)?),
        StorageKind::Keyring => Arc::new(KeyringBackend::new(KEYRING_SERVICE)),
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}
