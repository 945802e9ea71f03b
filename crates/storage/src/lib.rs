//! Response-addressable storage for the Larder caching worker.
//!
//! This crate provides:
//! - The named-cache storage façade the worker core is written against
//! - Backends: in-memory (tests, embedders) and local filesystem
//!
//! Asset bodies, dynamic responses, and the worker's own persisted state
//! (through the worker's table façade) all live in the same store.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{CacheStorage, NamedCache};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Keep everything in memory; nothing survives a restart.
    Memory,
    /// Persist under a directory root.
    Filesystem { path: PathBuf },
}

/// Create a cache storage from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn CacheStorage>> {
    match config {
        StorageConfig::Memory => Ok(MemoryBackend::new()),
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(backend)
        }
    }
}
