//! Driver: lifecycle, version routing, updates, and degraded modes.
//!
//! The driver is process-wide state with lifetime equal to the worker's.
//! It loads persisted control state on the first intercepted request (cold
//! starts re-run this; that is the recovery mechanism), pins each client to
//! an app version for the client's lifetime, detects manifest updates, and
//! degrades when a version breaks rather than taking the page down.

use crate::adapter::{Adapter, EventContext};
use crate::app_version::AppVersion;
use crate::db::{Database, Table};
use crate::error::{Error, Result};
use crate::idle::IdleScheduler;
use crate::state::WorkerContext;
use crate::transport::NetworkTransport;
use crate::update::UpdateSource;
use async_trait::async_trait;
use larder_core::{ContentHash, MANIFEST_URL, Manifest, ManifestHash, Request, Response, urls};
use larder_storage::CacheStorage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Virtual URL answered by the driver itself with a state dump.
const DEBUG_STATE_URL: &str = "/ngsw/state";

/// Driver configuration.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Origin of the worker's scope (e.g. `http://localhost:4200`). Requests
    /// outside this origin are not handled. Empty means only path-absolute
    /// URLs are in scope.
    pub scope_origin: String,
    /// Minimum interval between opportunistic update checks.
    pub update_interval_ms: u64,
    /// Idle debounce threshold for deferred work.
    pub idle_threshold_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            scope_origin: String::new(),
            update_interval_ms: 12_000,
            idle_threshold_ms: 5_000,
        }
    }
}

/// Readiness of the driver to take on traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// New clients are accepted onto the latest version.
    Normal,
    /// Only clients already pinned are served; new clients go to the
    /// network. Entered when the latest version fails; left on the next
    /// successful update.
    ExistingClientsOnly,
    /// The driver declines all requests. Entered when initialization itself
    /// fails; persists until the worker restarts.
    SafeMode,
}

impl DriverState {
    fn as_str(&self) -> &'static str {
        match self {
            DriverState::Normal => "NORMAL",
            DriverState::ExistingClientsOnly => "EXISTING_CLIENTS_ONLY",
            DriverState::SafeMode => "SAFE_MODE",
        }
    }
}

/// Persisted `latest` record in the control table.
#[derive(Debug, Serialize, Deserialize)]
struct LatestRecord {
    latest: String,
}

struct DriverInner {
    state: DriverState,
    initialized: bool,
    /// ManifestHash hex -> installed version.
    versions: HashMap<String, Arc<AppVersion>>,
    /// Client ID -> ManifestHash hex.
    client_map: HashMap<String, String>,
    latest: Option<String>,
    last_update_check: u64,
}

/// The version-orchestration singleton.
pub struct Driver {
    config: DriverConfig,
    ctx: WorkerContext,
    inner: tokio::sync::Mutex<DriverInner>,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        storage: Arc<dyn CacheStorage>,
        adapter: Arc<dyn Adapter>,
        transport: Arc<dyn NetworkTransport>,
    ) -> Arc<Self> {
        let db = Database::new(storage.clone());
        let idle = IdleScheduler::new(adapter.clone(), config.idle_threshold_ms);
        let ctx = WorkerContext {
            storage,
            db,
            adapter,
            transport,
            idle,
        };
        Arc::new(Self {
            config,
            ctx,
            inner: tokio::sync::Mutex::new(DriverInner {
                state: DriverState::Normal,
                initialized: false,
                versions: HashMap::new(),
                client_map: HashMap::new(),
                latest: None,
                last_update_check: 0,
            }),
        })
    }

    /// The idle scheduler; the host wakes it at the end of each event.
    pub fn idle(&self) -> &Arc<IdleScheduler> {
        &self.ctx.idle
    }

    /// Current ready state.
    pub async fn state(&self) -> DriverState {
        self.inner.lock().await.state
    }

    /// Handle an intercepted request for the client `client_id` (None for
    /// navigation preloads). `None` tells the interceptor to fall through
    /// to the network; the driver itself never fails a request.
    pub async fn handle_fetch(
        self: &Arc<Self>,
        req: &Request,
        client_id: Option<&str>,
        event: &dyn EventContext,
    ) -> Option<Response> {
        let scoped = urls::scope_relative(&req.url, &self.config.scope_origin)?;
        let req = if scoped == req.url {
            req.clone()
        } else {
            req.for_url(scoped)
        };

        if urls::path_only(&req.url) == DEBUG_STATE_URL {
            return Some(self.debug_state().await);
        }

        match self.handle_fetch_inner(&req, client_id, event).await {
            Ok(res) => res,
            Err(e) => {
                error!(url = %req.url, error = %e, "unexpected driver error, entering safe mode");
                self.inner.lock().await.state = DriverState::SafeMode;
                None
            }
        }
    }

    async fn handle_fetch_inner(
        self: &Arc<Self>,
        req: &Request,
        client_id: Option<&str>,
        event: &dyn EventContext,
    ) -> Result<Option<Response>> {
        if self.ensure_initialized().await.is_err() {
            // Already in safe mode; the runtime serves from the network.
            return Ok(None);
        }

        let version = {
            let mut inner = self.inner.lock().await;
            if inner.state == DriverState::SafeMode {
                return Ok(None);
            }
            self.maybe_schedule_update_check(&mut inner);
            match self.assign_version(&mut inner, client_id)? {
                Some(version) => version,
                None => return Ok(None),
            }
        };

        match version.handle_fetch(req, event).await {
            Ok(res) => Ok(res),
            Err(e) => {
                // Runtime fetch failures are non-fatal; the caller falls
                // through to the network.
                debug!(url = %req.url, error = %e, "version failed to serve, falling through");
                Ok(None)
            }
        }
    }

    /// Select the app version serving a request, pinning new clients to the
    /// latest version while the driver is in its normal state.
    fn assign_version(
        self: &Arc<Self>,
        inner: &mut DriverInner,
        client_id: Option<&str>,
    ) -> Result<Option<Arc<AppVersion>>> {
        let latest_version = |inner: &DriverInner| -> Result<Option<Arc<AppVersion>>> {
            let Some(latest) = &inner.latest else {
                return Err(Error::State("no latest version recorded".to_string()));
            };
            match inner.versions.get(latest) {
                Some(version) => Ok(Some(version.clone())),
                None => Err(Error::State(format!(
                    "latest hash {latest} has no installed version"
                ))),
            }
        };

        match client_id {
            Some(client) => {
                if let Some(hex) = inner.client_map.get(client) {
                    // Serve the pinned version even when it is marked
                    // broken: its cache is immutable and hash-verified, so
                    // resource reads out of it stay safe.
                    return match inner.versions.get(hex) {
                        Some(version) => Ok(Some(version.clone())),
                        None => Err(Error::State(format!(
                            "client {client} assigned to unknown version {hex}"
                        ))),
                    };
                }
                if inner.state != DriverState::Normal {
                    return Ok(None);
                }
                let assigned = latest_version(inner)?;
                if let Some(latest) = inner.latest.clone() {
                    inner.client_map.insert(client.to_string(), latest);
                    self.schedule_state_sync();
                }
                Ok(assigned)
            }
            None => {
                if inner.state != DriverState::Normal {
                    return Ok(None);
                }
                latest_version(inner)
            }
        }
    }

    /// One-shot initialization; concurrent callers line up behind the first.
    async fn ensure_initialized(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.initialized {
            return match inner.state {
                DriverState::SafeMode => Err(Error::State("driver is in safe mode".to_string())),
                _ => Ok(()),
            };
        }
        let result = self.initialize(&mut inner).await;
        inner.initialized = true;
        if let Err(e) = &result {
            error!(error = %e, "driver initialization failed, entering safe mode");
            inner.state = DriverState::SafeMode;
        }
        result
    }

    /// Load persisted control state (or perform a fresh install), build one
    /// version per installed manifest, and rehydrate client assignments.
    ///
    /// Returns an explicitly boxed future (rather than `async fn`) because
    /// this method's call graph loops back through the idle-scheduled
    /// post-load task into `check_for_update`/`ensure_initialized`; with an
    /// opaque `impl Future` return type that cycle defeats the compiler's
    /// auto-trait (`Send`) inference.
    fn initialize<'a>(
        self: &'a Arc<Self>,
        inner: &'a mut DriverInner,
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move {
        let control = self.ctx.db.open("control").await?;

        let (manifests, assignments, latest) = match self.load_control_state(&control).await {
            Ok(state) => state,
            Err(e) => {
                // A read miss or corrupt state both mean the same thing:
                // nothing usable is installed, so install from the network.
                debug!(error = %e, "no usable persisted state, performing fresh install");
                let manifest = self.fetch_latest_manifest().await?;
                let hash = ManifestHash::compute(&manifest)?;
                let mut manifests = BTreeMap::new();
                manifests.insert(hash.to_hex(), manifest);
                let assignments = BTreeMap::new();
                let latest = LatestRecord {
                    latest: hash.to_hex(),
                };
                control.write("manifests", &manifests).await?;
                control.write("assignments", &assignments).await?;
                control.write("latest", &latest).await?;
                (manifests, assignments, latest)
            }
        };

        if !manifests.contains_key(&latest.latest) {
            return Err(Error::State(format!(
                "latest hash {} is not among installed manifests",
                latest.latest
            )));
        }
        for (client, hex) in &assignments {
            if !manifests.contains_key(hex) {
                return Err(Error::State(format!(
                    "client {client} is assigned to uninstalled version {hex}"
                )));
            }
        }

        let inline_init = urls::is_localhost_scope(&self.config.scope_origin);
        let mut failed = Vec::new();
        for (hex, manifest) in manifests {
            let hash = ManifestHash::from_hex(&hex)?;
            let version = AppVersion::new(Arc::new(manifest), hash, &self.ctx).await?;
            if inline_init {
                if let Err(e) = version.initialize_fully(None).await {
                    warn!(version = %hex, error = %e, "version initialization failed");
                    failed.push(version.clone());
                }
            } else {
                let driver = Arc::clone(self);
                let deferred = version.clone();
                self.ctx.idle.schedule(format!("init version {hex}"), async move {
                    match deferred.initialize_fully(None).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            driver.version_failed(&deferred).await;
                            Err(e)
                        }
                    }
                });
            }
            inner.versions.insert(hex, version);
        }

        inner.client_map = assignments.into_iter().collect();
        inner.latest = Some(latest.latest);
        inner.state = DriverState::Normal;
        inner.last_update_check = self.ctx.adapter.now_ms();

        for version in failed {
            self.version_failed_locked(inner, &version);
        }

        let driver = Arc::clone(self);
        self.ctx
            .idle
            .schedule("init post-load (update check, cleanup)", async move {
                driver.check_for_update().await?;
                driver.cleanup_caches().await
            });
        Ok(())
        })
    }

    async fn load_control_state(
        &self,
        control: &Arc<Table>,
    ) -> Result<(BTreeMap<String, Manifest>, BTreeMap<String, String>, LatestRecord)> {
        let manifests = control.read("manifests").await?;
        let assignments = control.read("assignments").await?;
        let latest = control.read("latest").await?;
        Ok((manifests, assignments, latest))
    }

    /// Fetch and validate the manifest, bypassing intermediary caches.
    async fn fetch_latest_manifest(&self) -> Result<Manifest> {
        let url = urls::cache_bust(MANIFEST_URL, &self.ctx.adapter.cache_bust_nonce());
        let res = self.ctx.transport.fetch(&Request::get(url)).await?;
        if !res.ok() {
            return Err(Error::UnexpectedStatus {
                url: MANIFEST_URL.to_string(),
                status: res.status,
            });
        }
        let manifest: Manifest = serde_json::from_slice(&res.body)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Queue an opportunistic update check once the configured interval has
    /// elapsed.
    fn maybe_schedule_update_check(self: &Arc<Self>, inner: &mut DriverInner) {
        let now = self.ctx.adapter.now_ms();
        if now.saturating_sub(inner.last_update_check) < self.config.update_interval_ms {
            return;
        }
        inner.last_update_check = now;
        let driver = Arc::clone(self);
        self.ctx.idle.schedule("check-updates", async move {
            driver.check_for_update().await?;
            driver.cleanup_caches().await
        });
    }

    /// Check the server for a new manifest and install it as the latest
    /// version. Returns whether a new version was installed. A failure while
    /// initializing the candidate leaves all prior state unchanged.
    pub async fn check_for_update(self: &Arc<Self>) -> Result<bool> {
        self.ensure_initialized().await?;

        let manifest = self.fetch_latest_manifest().await?;
        let hash = ManifestHash::compute(&manifest)?;
        let hex = hash.to_hex();

        {
            let inner = self.inner.lock().await;
            if inner.versions.contains_key(&hex) {
                return Ok(false);
            }
        }

        let version = AppVersion::new(Arc::new(manifest), hash, &self.ctx).await?;
        // The previous installation is offered as an update source so
        // hash-identical resources are copied instead of re-fetched.
        let update_from: Arc<dyn UpdateSource> = self.clone();
        version.initialize_fully(Some(&update_from)).await?;

        {
            let mut inner = self.inner.lock().await;
            inner.versions.insert(hex.clone(), version);
            inner.latest = Some(hex.clone());
            // A successful update restores normal service for new clients.
            if inner.state == DriverState::ExistingClientsOnly {
                inner.state = DriverState::Normal;
            }
        }
        debug!(version = %hex, "installed new version");
        self.sync_state().await?;
        Ok(true)
    }

    /// React to a version failing initialization.
    pub async fn version_failed(self: &Arc<Self>, version: &Arc<AppVersion>) {
        let mut inner = self.inner.lock().await;
        self.version_failed_locked(&mut inner, version);
        self.schedule_state_sync();
    }

    fn version_failed_locked(&self, inner: &mut DriverInner, version: &Arc<AppVersion>) {
        let Some(hex) = inner
            .versions
            .iter()
            .find(|(_, v)| Arc::ptr_eq(v, version))
            .map(|(hex, _)| hex.clone())
        else {
            return;
        };

        if inner.latest.as_deref() == Some(hex.as_str()) {
            // The version new clients would get is broken: stop accepting
            // new clients until the next successful update.
            warn!(version = %hex, "latest version is broken, serving existing clients only");
            inner.state = DriverState::ExistingClientsOnly;
            inner.client_map.clear();
        } else {
            let Some(latest) = inner.latest.clone() else {
                return;
            };
            let mut moved = 0usize;
            for assigned in inner.client_map.values_mut() {
                if *assigned == hex {
                    *assigned = latest.clone();
                    moved += 1;
                }
            }
            warn!(version = %hex, moved, "broken version abandoned, clients moved to latest");
        }
    }

    /// Queue a persistence write of the control state.
    fn schedule_state_sync(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        self.ctx
            .idle
            .schedule("sync-state", async move { driver.sync_state().await });
    }

    /// Persist manifests, assignments, and the latest pointer.
    async fn sync_state(&self) -> Result<()> {
        let (manifests, assignments, latest) = {
            let inner = self.inner.lock().await;
            let manifests: BTreeMap<String, Manifest> = inner
                .versions
                .iter()
                .map(|(hex, version)| (hex.clone(), version.manifest().as_ref().clone()))
                .collect();
            let assignments: BTreeMap<String, String> = inner
                .client_map
                .iter()
                .map(|(client, hex)| (client.clone(), hex.clone()))
                .collect();
            let Some(latest) = inner.latest.clone() else {
                return Err(Error::State("no latest version to persist".to_string()));
            };
            (manifests, assignments, LatestRecord { latest })
        };

        let control = self.ctx.db.open("control").await?;
        control.write("manifests", &manifests).await?;
        control.write("assignments", &assignments).await?;
        control.write("latest", &latest).await?;
        Ok(())
    }

    /// Drop versions no live client is pinned to (and that are not the
    /// latest), deleting their namespaced stores and tables.
    pub async fn cleanup_caches(self: &Arc<Self>) -> Result<()> {
        let doomed: Vec<String> = {
            let mut inner = self.inner.lock().await;
            let keep: std::collections::HashSet<String> = inner
                .client_map
                .values()
                .cloned()
                .chain(inner.latest.clone())
                .collect();
            let doomed: Vec<String> = inner
                .versions
                .keys()
                .filter(|hex| !keep.contains(*hex))
                .cloned()
                .collect();
            for hex in &doomed {
                inner.versions.remove(hex);
            }
            doomed
        };
        if doomed.is_empty() {
            return Ok(());
        }

        for hex in &doomed {
            debug!(version = %hex, "removing caches of retired version");
            let asset_prefix = format!("{hex}:assets:");
            for name in self.ctx.storage.list().await? {
                match name.strip_prefix(larder_core::DB_PREFIX) {
                    Some(table) if table.starts_with(&asset_prefix) => {
                        self.ctx.db.delete(table).await?;
                    }
                    None if name.starts_with(&asset_prefix) => {
                        self.ctx.storage.delete(&name).await?;
                    }
                    _ => {}
                }
            }
        }
        self.sync_state().await
    }

    /// Plain-text dump of driver state for the debug endpoint.
    async fn debug_state(&self) -> Response {
        let inner = self.inner.lock().await;
        let mut out = String::new();
        let _ = writeln!(out, "Larder driver state: {}", inner.state.as_str());
        let _ = writeln!(
            out,
            "Latest manifest hash: {}",
            inner.latest.as_deref().unwrap_or("(none)")
        );
        let _ = writeln!(out, "Last update check: {}", inner.last_update_check);
        let mut versions: Vec<(&String, &Arc<AppVersion>)> = inner.versions.iter().collect();
        versions.sort_by(|a, b| a.0.cmp(b.0));
        for (hex, version) in versions {
            let clients: Vec<&str> = inner
                .client_map
                .iter()
                .filter(|(_, assigned)| assigned.as_str() == hex.as_str())
                .map(|(client, _)| client.as_str())
                .collect();
            let _ = writeln!(
                out,
                "=== Version {hex} (okay: {}) ===\nClients: {}",
                version.okay(),
                clients.join(", ")
            );
        }
        Response::ok_with_body(out).with_header("content-type", "text/plain")
    }
}

#[async_trait]
impl UpdateSource for Driver {
    /// Null-biased fold over installed versions: the first version holding a
    /// hash-identical cached resource wins.
    async fn lookup_with_hash(&self, url: &str, hash: &ContentHash) -> Option<Response> {
        let versions: Vec<Arc<AppVersion>> =
            self.inner.lock().await.versions.values().cloned().collect();
        for version in versions {
            if let Some(res) = version.lookup_with_hash(url, hash).await {
                return Some(res);
            }
        }
        None
    }

    async fn lookup_without_hash(&self, url: &str) -> Option<(Response, Option<u64>)> {
        let latest = self.latest_version().await?;
        latest.lookup_without_hash(url).await
    }

    async fn previously_cached_urls(&self) -> Vec<String> {
        match self.latest_version().await {
            Some(latest) => latest.previously_cached_urls().await,
            None => Vec::new(),
        }
    }
}

impl Driver {
    async fn latest_version(&self) -> Option<Arc<AppVersion>> {
        let inner = self.inner.lock().await;
        inner
            .latest
            .as_ref()
            .and_then(|hex| inner.versions.get(hex))
            .cloned()
    }
}
