//! Durable key/value storage underneath the credential store.
//!
//! This module provides:
//! - `StorageBackend`: the pluggable backend trait, with in-memory, JSON file,
//!   and OS keychain implementations
//! - `SharedStorage`: one backend shared by several execution contexts, which
//!   publishes a `StorageEvent` for every value change
//! - `StorageHandle`: a per-context view that only hears about writes made by
//!   the other contexts

pub mod backend;
pub mod shared;

use thiserror::Error;

pub use backend::{FileBackend, KeyringBackend, MemoryBackend, StorageBackend};
pub use shared::{SharedStorage, StorageEvent, StorageHandle, StorageSubscription};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
