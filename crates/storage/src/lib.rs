//! Shard storage as seen by the data channel.
//!
//! The channel never persists bytes itself: it asks a [`Manager`] for a
//! [`StorageItem`], which carries the agreed [`Contract`]s and a [`Shard`]
//! handle to read from or write to. Two adapters ship with the crate, an
//! in-process [`MemoryManager`] and a directory-backed [`FsManager`].

mod contract;
mod fs;
mod hash;
mod item;
mod manager;
mod memory;
mod validation;

pub use contract::Contract;
pub use fs::FsManager;
pub use hash::{ContentHasher, content_hash, digests_match};
pub use item::{Shard, ShardReader, ShardWriter, StorageItem};
pub use manager::{LoadFuture, Manager};
pub use memory::MemoryManager;
pub use validation::validate_hash;

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("shard not found: {0}")]
    NotFound(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),
}
