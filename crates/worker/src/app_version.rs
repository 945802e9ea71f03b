//! The runtime binding of one manifest.

use crate::adapter::EventContext;
use crate::assets::AssetGroup;
use crate::data::DataGroup;
use crate::error::Result;
use crate::state::WorkerContext;
use crate::update::UpdateSource;
use async_trait::async_trait;
use larder_core::{ContentHash, Manifest, ManifestHash, Request, Response};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Compiled navigation routing: requests matching `includes` (and no
/// `excludes`) are served as the application index.
struct NavigationSpec {
    index: String,
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

/// One installed app version: its manifest, its asset groups, its data
/// groups, and whether it is still believed to be servable.
pub struct AppVersion {
    manifest: Arc<Manifest>,
    hash: ManifestHash,
    hash_table: Arc<BTreeMap<String, ContentHash>>,
    asset_groups: Vec<Arc<AssetGroup>>,
    data_groups: Vec<Arc<DataGroup>>,
    navigation: Option<NavigationSpec>,
    okay: AtomicBool,
}

impl AppVersion {
    pub async fn new(
        manifest: Arc<Manifest>,
        hash: ManifestHash,
        ctx: &WorkerContext,
    ) -> Result<Arc<Self>> {
        let hash_table = Arc::new(manifest.hash_table.clone());
        let hex = hash.to_hex();

        let mut asset_groups = Vec::with_capacity(manifest.asset_groups.len());
        for config in &manifest.asset_groups {
            asset_groups.push(AssetGroup::new(&hex, config, hash_table.clone(), ctx).await?);
        }
        let mut data_groups = Vec::with_capacity(manifest.data_groups.len());
        for config in &manifest.data_groups {
            data_groups.push(DataGroup::new(config, ctx).await?);
        }

        let navigation = match (&manifest.index, manifest.navigation_urls.is_empty()) {
            (Some(index), false) => {
                let mut includes = Vec::new();
                let mut excludes = Vec::new();
                for pattern in &manifest.navigation_urls {
                    match pattern.strip_prefix('!') {
                        Some(negated) => excludes
                            .push(compile_navigation_pattern(negated)?),
                        None => includes.push(compile_navigation_pattern(pattern)?),
                    }
                }
                Some(NavigationSpec {
                    index: index.clone(),
                    includes,
                    excludes,
                })
            }
            _ => None,
        };

        Ok(Arc::new(Self {
            manifest,
            hash,
            hash_table,
            asset_groups,
            data_groups,
            navigation,
            okay: AtomicBool::new(true),
        }))
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn hash(&self) -> &ManifestHash {
        &self.hash
    }

    /// Whether initialization has ever failed for this version.
    pub fn okay(&self) -> bool {
        self.okay.load(Ordering::SeqCst)
    }

    /// Initialize asset groups serially in declaration order, reusing
    /// hash-identical resources from `update_from` where possible. Data
    /// groups require no initialization. A failure marks the version
    /// not-okay and propagates.
    pub async fn initialize_fully(
        &self,
        update_from: Option<&Arc<dyn UpdateSource>>,
    ) -> Result<()> {
        for group in &self.asset_groups {
            if let Err(e) = group.initialize_fully(update_from).await {
                self.okay.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Dispatch a request: asset groups in declaration order, then data
    /// groups; the first group that serves wins. `None` means no group is
    /// responsible and the caller should fall through to the network.
    pub async fn handle_fetch(
        &self,
        req: &Request,
        event: &dyn EventContext,
    ) -> Result<Option<Response>> {
        let rewritten;
        let req = match self.navigation_target(req) {
            Some(index) => {
                debug!(url = %req.url, index = %index, "serving navigation from index");
                rewritten = req.for_url(index);
                &rewritten
            }
            None => req,
        };

        for group in &self.asset_groups {
            if let Some(res) = group.handle_fetch(req).await? {
                return Ok(Some(res));
            }
        }
        for group in &self.data_groups {
            if let Some(res) = group.handle_fetch(req, event).await? {
                return Ok(Some(res));
            }
        }
        Ok(None)
    }

    /// The index URL to serve for a navigation request, if this version
    /// routes it there.
    fn navigation_target(&self, req: &Request) -> Option<String> {
        if !req.is_navigation {
            return None;
        }
        let nav = self.navigation.as_ref()?;
        let path = larder_core::urls::path_only(&req.url);
        if nav.excludes.iter().any(|p| p.is_match(path)) {
            return None;
        }
        if nav.includes.iter().any(|p| p.is_match(path)) {
            Some(nav.index.clone())
        } else {
            None
        }
    }
}

/// Navigation patterns are anchored regexes over the URL path.
fn compile_navigation_pattern(pattern: &str) -> Result<Regex> {
    Ok(
        larder_core::manifest::compile_patterns("navigationUrls", &[pattern.to_string()])
            .map(|mut v| v.remove(0))?,
    )
}

#[async_trait]
impl UpdateSource for AppVersion {
    async fn lookup_with_hash(&self, url: &str, hash: &ContentHash) -> Option<Response> {
        // Only content this version pins to exactly the requested hash is
        // reusable; the cache is authoritative because it was verified at
        // install time.
        if self.hash_table.get(url) != Some(hash) {
            return None;
        }
        for group in &self.asset_groups {
            if let Some(res) = group.cached_response(url).await {
                return Some(res);
            }
        }
        None
    }

    async fn lookup_without_hash(&self, url: &str) -> Option<(Response, Option<u64>)> {
        for group in &self.asset_groups {
            if let Some(res) = group.cached_response(url).await {
                let ts = group.cached_meta_ts(url).await;
                return Some((res, ts));
            }
        }
        None
    }

    async fn previously_cached_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for group in &self.asset_groups {
            urls.extend(group.cached_unhashed_urls().await);
        }
        urls
    }
}

impl std::fmt::Debug for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppVersion")
            .field("hash", &self.hash)
            .field("okay", &self.okay())
            .finish()
    }
}
