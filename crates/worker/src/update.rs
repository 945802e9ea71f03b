//! Cross-version resource reuse.

use async_trait::async_trait;
use larder_core::{ContentHash, Response};

/// Read-only view a newly installing version gets of already-installed state.
///
/// This is the only legitimate cross-version API: a new version may copy
/// resources out of it instead of going to the network, but never mutates
/// through it.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// The cached response for `url`, provided the source pins it to exactly
    /// `hash`. Hash-identical content is safe to reuse across versions.
    async fn lookup_with_hash(&self, url: &str, hash: &ContentHash) -> Option<Response>;

    /// The cached response for an unhashed `url`, together with the stored
    /// metadata timestamp its freshness was computed from.
    async fn lookup_without_hash(&self, url: &str) -> Option<(Response, Option<u64>)>;

    /// URLs of unhashed resources the source has cached.
    async fn previously_cached_urls(&self) -> Vec<String>;
}
