//! Dynamic API response caching.
//!
//! A data group caches pattern-matched GET/HEAD responses with an LRU bound
//! and a TTL, optionally racing the network against a timeout. Mutating
//! requests invalidate the cached entry and pass through unchanged.

use crate::adapter::EventContext;
use crate::db::Table;
use crate::error::Result;
use crate::lru::{LruList, LruState};
use crate::state::WorkerContext;
use futures::future::{self, Either};
use larder_core::{DataGroupConfig, Method, Request, Response};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stored per cached URL: when its response was last written.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgeRecord {
    age: u64,
}

/// One data group of a single app version.
pub struct DataGroup {
    name: String,
    config: DataGroupConfig,
    patterns: Vec<Regex>,
    cache: Arc<dyn larder_storage::NamedCache>,
    lru_table: Arc<Table>,
    age_table: Arc<Table>,
    ctx: WorkerContext,
    /// In-memory LRU; mutations are serialized by this lock and snapshotted
    /// to the lru table after each cache-mutating operation.
    lru: tokio::sync::Mutex<LruList>,
}

impl DataGroup {
    pub async fn new(config: &DataGroupConfig, ctx: &WorkerContext) -> Result<Arc<Self>> {
        let cache = ctx
            .storage
            .open(&format!("data:{}:cache", config.name))
            .await?;
        let lru_table = ctx.db.open(&format!("data:{}:lru", config.name)).await?;
        let age_table = ctx.db.open(&format!("data:{}:age", config.name)).await?;
        let patterns = larder_core::manifest::compile_patterns(&config.name, &config.patterns)?;

        // Rehydrate the LRU snapshot; a missing or corrupt snapshot starts
        // the group empty, which only costs re-fetches.
        let lru = match lru_table.read::<LruState>("lru").await {
            Ok(state) => LruList::from_state(state),
            Err(e) if e.is_not_found() => LruList::new(),
            Err(e) => {
                warn!(group = %config.name, error = %e, "corrupt lru snapshot, starting empty");
                LruList::new()
            }
        };

        Ok(Arc::new(Self {
            name: config.name.clone(),
            config: config.clone(),
            patterns,
            cache,
            lru_table,
            age_table,
            ctx: ctx.clone(),
            lru: tokio::sync::Mutex::new(lru),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this group is responsible for a URL.
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    /// Serve a matched request, or abstain with `None`.
    pub async fn handle_fetch(
        self: &Arc<Self>,
        req: &Request,
        event: &dyn EventContext,
    ) -> Result<Option<Response>> {
        if !self.matches(&req.url) {
            return Ok(None);
        }
        match req.method {
            // Preflights never touch the cache.
            Method::Options => Ok(None),
            Method::Get | Method::Head => self.handle_read(req, event).await.map(Some),
            _ => self.handle_mutation(req).await.map(Some),
        }
    }

    /// GET/HEAD: serve fresh cached data, otherwise go to the network and
    /// cache the result.
    async fn handle_read(
        self: &Arc<Self>,
        req: &Request,
        event: &dyn EventContext,
    ) -> Result<Response> {
        let now = self.ctx.adapter.now_ms();
        {
            let mut lru = self.lru.lock().await;
            if let Some(res) = self.lookup_fresh(req, now, &mut lru).await? {
                lru.accessed(&req.url);
                self.sync_lru(&lru).await?;
                return Ok(res);
            }
        }
        self.fetch_with_timeout(req, event).await
    }

    /// The cached response for `req` if it is within `maxAge`. An expired or
    /// unreadable entry is dropped from the LRU, cache, and age table before
    /// reporting a miss.
    async fn lookup_fresh(
        &self,
        req: &Request,
        now: u64,
        lru: &mut LruList,
    ) -> Result<Option<Response>> {
        let (cached, read_failed) = match self.cache.match_request(req).await {
            Ok(cached) => (cached, false),
            Err(e) => {
                warn!(group = %self.name, url = %req.url, error = %e, "cache read failed, treating as expired");
                (None, true)
            }
        };
        let Some(res) = cached else {
            if read_failed {
                // The entry may exist but be unreadable; drop whatever is
                // left of it before re-fetching.
                lru.remove(&req.url);
                self.purge_url(&req.url).await?;
                self.sync_lru(lru).await?;
            }
            return Ok(None);
        };

        let fresh = match self.age_table.read::<AgeRecord>(&req.url).await {
            Ok(record) => now.saturating_sub(record.age) <= self.config.max_age,
            // An entry with no age record cannot prove its freshness.
            Err(_) => false,
        };
        if fresh {
            return Ok(Some(res));
        }

        lru.remove(&req.url);
        self.purge_url(&req.url).await?;
        self.sync_lru(lru).await?;
        Ok(None)
    }

    /// Network fetch for a cache miss, honoring the configured timeout.
    ///
    /// When the timer wins, the caller gets a synthetic 504 immediately, and
    /// the real fetch keeps running under the event context so its response
    /// can still populate the cache for subsequent requests.
    async fn fetch_with_timeout(
        self: &Arc<Self>,
        req: &Request,
        event: &dyn EventContext,
    ) -> Result<Response> {
        let group = Arc::clone(self);
        let request = req.clone();
        let fetch: future::BoxFuture<'static, Result<Response>> = Box::pin(async move {
            let res = group.ctx.transport.fetch(&request).await?;
            group.cache_response(&request, &res).await?;
            Ok(res)
        });

        let Some(timeout_ms) = self.config.timeout_ms else {
            return fetch.await;
        };

        let adapter = self.ctx.adapter.clone();
        let timer = Box::pin(async move { adapter.timeout(timeout_ms).await });
        match future::select(fetch, timer).await {
            Either::Left((result, _)) => result,
            Either::Right(((), fetch)) => {
                debug!(group = %self.name, url = %req.url, "network timed out, serving 504");
                let url = req.url.clone();
                event.wait_until(Box::pin(async move {
                    if let Err(e) = fetch.await {
                        debug!(url = %url, error = %e, "background fetch failed");
                    }
                }));
                Ok(Response::new(504))
            }
        }
    }

    /// Mutating request: invalidate the cached entry and forward unchanged.
    async fn handle_mutation(&self, req: &Request) -> Result<Response> {
        {
            let mut lru = self.lru.lock().await;
            lru.remove(&req.url);
            self.purge_url(&req.url).await?;
            self.sync_lru(&lru).await?;
        }
        self.ctx.transport.fetch(req).await
    }

    /// Cache a network response, evicting the LRU tail when at capacity.
    /// Non-OK responses are not cached.
    async fn cache_response(&self, req: &Request, res: &Response) -> Result<()> {
        if !res.ok() {
            return Ok(());
        }
        let mut lru = self.lru.lock().await;
        if u64::from(lru.size()) >= u64::from(self.config.max_size)
            && let Some(victim) = lru.pop()
        {
            self.purge_url(&victim).await?;
        }
        lru.accessed(&req.url);
        self.cache.put(req, res.clone()).await?;
        self.age_table
            .write(&req.url, &AgeRecord { age: self.ctx.adapter.now_ms() })
            .await?;
        self.sync_lru(&lru).await?;
        Ok(())
    }

    /// Remove a URL's GET and HEAD cache entries and its age record.
    async fn purge_url(&self, url: &str) -> Result<()> {
        self.cache.delete(&Request::get(url)).await?;
        self.cache.delete(&Request::new(Method::Head, url)).await?;
        self.age_table.delete(url).await?;
        Ok(())
    }

    /// Persist the current LRU snapshot.
    async fn sync_lru(&self, lru: &LruList) -> Result<()> {
        self.lru_table.write("lru", lru.state()).await
    }
}

impl std::fmt::Debug for DataGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGroup")
            .field("name", &self.name)
            .field("max_size", &self.config.max_size)
            .field("max_age", &self.config.max_age)
            .finish()
    }
}
