//! Core domain types and shared logic for the Larder caching worker.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Manifest schema, validation, and SHA-1 manifest hashing
//! - Content hashes for hash-pinned assets
//! - HTTP request/response value types
//! - URL scope and cache-bust helpers

pub mod error;
pub mod hash;
pub mod http;
pub mod manifest;
pub mod urls;

pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, ManifestHash};
pub use http::{Headers, Method, Request, Response};
pub use manifest::{AssetGroupConfig, DataGroupConfig, InstallMode, Manifest};

/// Well-known path of the manifest within the worker's scope.
pub const MANIFEST_URL: &str = "/ngsw.json";

/// Query parameter used to defeat intermediary HTTP caches.
pub const CACHE_BUST_PARAM: &str = "ngsw-cache-bust";

/// Store-name prefix for persistence tables.
pub const DB_PREFIX: &str = "ngsw:db:";
