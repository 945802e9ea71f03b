//! Storage trait definitions.
//!
//! The worker addresses storage as a set of named caches, each mapping a
//! request (by URL and method) to a response. This is the same contract a
//! browser's cache storage exposes, so the worker core runs unchanged over
//! any backend implementing these traits.

use crate::error::StorageResult;
use async_trait::async_trait;
use larder_core::{Request, Response};
use std::sync::Arc;

/// A collection of named response caches.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Open a named cache, creating it if absent. Idempotent: repeated opens
    /// of the same name address the same cache.
    async fn open(&self, name: &str) -> StorageResult<Arc<dyn NamedCache>>;

    /// Delete a named cache and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> StorageResult<bool>;

    /// List the names of all caches.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// Static identifier for the backend type, used in logs.
    fn backend_name(&self) -> &'static str;
}

/// One named cache mapping requests to responses.
///
/// Responses are immutable after `put`; the cache stores its own copy, so a
/// caller may return the response it passed in without aliasing concerns.
#[async_trait]
pub trait NamedCache: Send + Sync + 'static {
    /// Store a response for a request, replacing any entry with the same
    /// URL and method.
    async fn put(&self, req: &Request, res: Response) -> StorageResult<()>;

    /// Look up the response stored for a request's URL and method.
    async fn match_request(&self, req: &Request) -> StorageResult<Option<Response>>;

    /// Remove the entry for a request's URL and method. Returns whether an
    /// entry existed.
    async fn delete(&self, req: &Request) -> StorageResult<bool>;

    /// List the requests this cache has entries for.
    async fn keys(&self) -> StorageResult<Vec<Request>>;
}
