//! Versioned static-asset caching.
//!
//! An asset group serves a manifest's hash-pinned URLs plus pattern-matched
//! unhashed resources. Hash-pinned content never goes stale: it is verified
//! against the manifest at install time and the cache is authoritative from
//! then on. Unhashed resources follow their HTTP freshness headers, serving
//! stale while a revalidation runs at idle.

use crate::adapter::Adapter;
use crate::db::Table;
use crate::error::{Error, Result};
use crate::idle::IdleScheduler;
use crate::state::WorkerContext;
use crate::transport::NetworkTransport;
use crate::update::UpdateSource;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use larder_core::{AssetGroupConfig, ContentHash, InstallMode, Request, Response, urls};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Stored per unhashed URL: when its response was written to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UrlMetadata {
    pub ts: u64,
}

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Response, Arc<Error>>>>;

/// One asset group of a single app version.
///
/// Prefetch and lazy groups share all runtime behavior; only
/// [`AssetGroup::initialize_fully`] differs by mode.
pub struct AssetGroup {
    name: String,
    mode: InstallMode,
    urls: Vec<String>,
    patterns: Vec<Regex>,
    /// The owning version's full URL -> hash lookup.
    hashes: Arc<BTreeMap<String, ContentHash>>,
    cache: Arc<dyn larder_storage::NamedCache>,
    meta: Arc<Table>,
    adapter: Arc<dyn Adapter>,
    transport: Arc<dyn NetworkTransport>,
    idle: Arc<IdleScheduler>,
    /// In-progress network-and-cache operations, keyed by URL. Never
    /// persisted; deduplicates concurrent fetches of the same asset.
    inflight: Mutex<HashMap<String, SharedFetch>>,
}

impl AssetGroup {
    pub async fn new(
        version_hex: &str,
        config: &AssetGroupConfig,
        hashes: Arc<BTreeMap<String, ContentHash>>,
        ctx: &WorkerContext,
    ) -> Result<Arc<Self>> {
        let cache = ctx
            .storage
            .open(&format!("{version_hex}:assets:{}:cache", config.name))
            .await?;
        let meta = ctx
            .db
            .open(&format!("{version_hex}:assets:{}:meta", config.name))
            .await?;
        let patterns = larder_core::manifest::compile_patterns(&config.name, &config.patterns)?;

        Ok(Arc::new(Self {
            name: config.name.clone(),
            mode: config.install_mode,
            urls: config.urls.clone(),
            patterns,
            hashes,
            cache,
            meta,
            adapter: ctx.adapter.clone(),
            transport: ctx.transport.clone(),
            idle: ctx.idle.clone(),
            inflight: Mutex::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this group is responsible for a URL.
    pub fn matches(&self, url: &str) -> bool {
        self.urls.iter().any(|u| u == url) || self.patterns.iter().any(|p| p.is_match(url))
    }

    /// Serve a matched request, or abstain with `None` for URLs outside this
    /// group.
    pub async fn handle_fetch(self: &Arc<Self>, req: &Request) -> Result<Option<Response>> {
        if !self.matches(&req.url) {
            return Ok(None);
        }

        if let Some(cached) = self.cached(req).await {
            if self.hashes.contains_key(&req.url) {
                // Hash-pinned resources never go stale.
                return Ok(Some(cached));
            }
            if self.is_stale(&req.url, &cached).await {
                let group = Arc::clone(self);
                let revalidate = req.clone();
                self.idle.schedule(format!("revalidate {}", req.url), async move {
                    group.fetch_and_cache_once(revalidate).await.map(|_| ())
                });
            }
            return Ok(Some(cached));
        }

        let res = self.fetch_and_cache_once(req.clone()).await?;
        Ok(Some(res))
    }

    /// Cache read that treats corruption as a miss.
    async fn cached(&self, req: &Request) -> Option<Response> {
        match self.cache.match_request(req).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(group = %self.name, url = %req.url, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Evaluate staleness of an unhashed resource from its response headers.
    ///
    /// `max-age` is measured from this group's recorded write time, falling
    /// back to the response's `Date` header; a resource whose age cannot be
    /// established is stale.
    async fn is_stale(&self, url: &str, res: &Response) -> bool {
        let now = self.adapter.now_ms();
        if let Some(max_age_s) = res.headers.get("cache-control").and_then(parse_max_age) {
            let origin = match self.meta.read::<UrlMetadata>(url).await {
                Ok(meta) => Some(meta.ts),
                Err(_) => res.headers.get("date").and_then(parse_http_date),
            };
            return match origin {
                Some(ts) => now.saturating_sub(ts) > max_age_s.saturating_mul(1000),
                None => true,
            };
        }
        if let Some(expires) = res.headers.get("expires").and_then(parse_http_date) {
            return now > expires;
        }
        true
    }

    /// Fetch a URL over the network and cache the result, deduplicating
    /// concurrent requests for the same URL: later callers join the
    /// in-flight operation instead of issuing a second fetch.
    pub async fn fetch_and_cache_once(self: &Arc<Self>, req: Request) -> Result<Response> {
        let url = req.url.clone();
        let fut = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&url) {
                Some(existing) => existing.clone(),
                None => {
                    let group = Arc::clone(self);
                    let key = url.clone();
                    let fut: BoxFuture<'static, std::result::Result<Response, Arc<Error>>> =
                        Box::pin(async move {
                            let result = group.fetch_and_cache(&req).await.map_err(Arc::new);
                            // Runs exactly once, before any joiner observes
                            // the result, on success and failure alike.
                            group.inflight.lock().unwrap().remove(&key);
                            result
                        });
                    let shared = fut.shared();
                    inflight.insert(url, shared.clone());
                    shared
                }
            }
        };
        fut.await.map_err(Error::Shared)
    }

    async fn fetch_and_cache(&self, req: &Request) -> Result<Response> {
        let res = self.fetch_from_network(req).await?;
        if !res.ok() {
            return Err(Error::UnexpectedStatus {
                url: req.url.clone(),
                status: res.status,
            });
        }
        self.cache.put(req, res.clone()).await?;
        if !self.hashes.contains_key(&req.url) {
            self.meta
                .write(&req.url, &UrlMetadata { ts: self.adapter.now_ms() })
                .await?;
        }
        Ok(res)
    }

    /// Network fetch with content verification for hash-pinned URLs.
    ///
    /// The first attempt is allowed to be satisfied by an intermediary HTTP
    /// cache; that cache is almost always right, and one extra cache-busted
    /// request on mismatch is cheaper than bypassing it everywhere.
    async fn fetch_from_network(&self, req: &Request) -> Result<Response> {
        let Some(expected) = self.hashes.get(&req.url) else {
            return self.transport.fetch(req).await;
        };

        let res = self.transport.fetch(req).await?;
        let actual = ContentHash::compute(&res.body);
        if actual == *expected {
            return Ok(res);
        }

        debug!(group = %self.name, url = %req.url, "content hash mismatch, retrying with cache bust");
        let busted = req.for_url(urls::cache_bust(&req.url, &self.adapter.cache_bust_nonce()));
        let res = self.transport.fetch(&busted).await?;
        let actual = ContentHash::compute(&res.body);
        if actual == *expected {
            return Ok(res);
        }
        Err(larder_core::Error::HashMismatch {
            url: req.url.clone(),
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        }
        .into())
    }

    /// Copy a hash-pinned resource from the update source if it holds an
    /// identical one, skipping the network entirely.
    async fn maybe_update(
        &self,
        req: &Request,
        update_from: Option<&Arc<dyn UpdateSource>>,
    ) -> Result<bool> {
        if let Some(source) = update_from
            && let Some(expected) = self.hashes.get(&req.url)
            && let Some(res) = source.lookup_with_hash(&req.url, expected).await
        {
            self.cache.put(req, res).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Bring this group to its installed state.
    ///
    /// Prefetch groups pull every listed URL (cross-copying from the update
    /// source where possible) and carry over still-matching unhashed
    /// resources. Lazy groups only cross-copy, best-effort, and never fetch
    /// missing URLs.
    pub async fn initialize_fully(
        self: &Arc<Self>,
        update_from: Option<&Arc<dyn UpdateSource>>,
    ) -> Result<()> {
        match self.mode {
            InstallMode::Prefetch => {
                for url in &self.urls {
                    let req = Request::get(url.clone());
                    if self.cached(&req).await.is_some() {
                        continue;
                    }
                    if self.maybe_update(&req, update_from).await? {
                        continue;
                    }
                    self.fetch_and_cache_once(req).await?;
                }
                if let Some(source) = update_from {
                    self.carry_over_unhashed(source).await?;
                }
                Ok(())
            }
            InstallMode::Lazy => {
                if let Some(source) = update_from {
                    for url in &self.urls {
                        let req = Request::get(url.clone());
                        if self.cached(&req).await.is_some() {
                            continue;
                        }
                        if let Err(e) = self.maybe_update(&req, Some(source)).await {
                            debug!(group = %self.name, url = %url, error = %e, "lazy cross-copy failed");
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Carry over unhashed resources the previous version had cached that
    /// this group is still responsible for, preserving their freshness
    /// metadata.
    async fn carry_over_unhashed(&self, source: &Arc<dyn UpdateSource>) -> Result<()> {
        for url in source.previously_cached_urls().await {
            if self.hashes.contains_key(&url) || !self.matches(&url) {
                continue;
            }
            let req = Request::get(url.clone());
            if self.cached(&req).await.is_some() {
                continue;
            }
            if let Some((res, ts)) = source.lookup_without_hash(&url).await {
                self.cache.put(&req, res).await?;
                if let Some(ts) = ts {
                    self.meta.write(&url, &UrlMetadata { ts }).await?;
                }
            }
        }
        Ok(())
    }

    // Cache-only accessors used for cross-version reuse.

    /// The cached response for a URL, without touching the network.
    pub async fn cached_response(&self, url: &str) -> Option<Response> {
        self.cached(&Request::get(url)).await
    }

    /// The recorded cache-write timestamp for an unhashed URL.
    pub async fn cached_meta_ts(&self, url: &str) -> Option<u64> {
        self.meta.read::<UrlMetadata>(url).await.ok().map(|m| m.ts)
    }

    /// URLs of cached resources that are not hash-pinned.
    pub async fn cached_unhashed_urls(&self) -> Vec<String> {
        match self.cache.keys().await {
            Ok(keys) => keys
                .into_iter()
                .map(|req| req.url)
                .filter(|url| !self.hashes.contains_key(url))
                .collect(),
            Err(e) => {
                warn!(group = %self.name, error = %e, "listing cached resources failed");
                Vec::new()
            }
        }
    }
}

/// Extract `max-age` seconds from a `Cache-Control` header. Other directives
/// are not recognized.
fn parse_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|s| s.parse().ok())
    })
}

/// Parse an HTTP date header into epoch milliseconds.
fn parse_http_date(value: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
        .and_then(|ms| u64::try_from(ms).ok())
}
