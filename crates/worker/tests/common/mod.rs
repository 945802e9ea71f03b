//! Shared test harness: a driver wired to mock collaborators.

pub mod fixtures;
pub mod mocks;

use larder_core::{Request, Response};
use larder_storage::{CacheStorage, MemoryBackend};
use larder_worker::{Adapter, Driver, DriverConfig};
use mocks::{MockAdapter, MockContext, MockServer};
use std::sync::Arc;

/// The fixture scope. Localhost, so versions initialize inline during the
/// first request instead of waiting for idle time.
pub const SCOPE: &str = "http://localhost";

pub struct Harness {
    pub adapter: Arc<MockAdapter>,
    pub server: Arc<MockServer>,
    pub storage: Arc<MemoryBackend>,
    pub context: Arc<MockContext>,
    pub driver: Arc<Driver>,
}

impl Harness {
    /// A fresh driver over empty storage and a v1 server.
    pub fn new() -> Self {
        let adapter = MockAdapter::new(100_000);
        let server = fixtures::server_v1(&adapter);
        Self::with(adapter, server, MemoryBackend::new(), SCOPE)
    }

    /// A driver over existing storage, as after a worker restart.
    pub fn restarted(previous: &Harness) -> Self {
        let adapter = MockAdapter::new(previous.adapter.now_ms());
        let server = MockServer::new(adapter.clone());
        Self::with(adapter, server, previous.storage.clone(), SCOPE)
    }

    pub fn with(
        adapter: Arc<MockAdapter>,
        server: Arc<MockServer>,
        storage: Arc<MemoryBackend>,
        scope: &str,
    ) -> Self {
        let config = DriverConfig {
            scope_origin: scope.to_string(),
            ..DriverConfig::default()
        };
        let driver = Driver::new(
            config,
            storage.clone(),
            adapter.clone(),
            server.clone(),
        );
        Self {
            adapter,
            server,
            storage,
            context: MockContext::new(),
            driver,
        }
    }

    /// Dispatch a GET through the driver for the given client.
    pub async fn fetch(&self, url: &str, client: Option<&str>) -> Option<Response> {
        self.request(Request::get(url), client).await
    }

    pub async fn request(&self, req: Request, client: Option<&str>) -> Option<Response> {
        self.driver
            .handle_fetch(&req, client, &*self.context)
            .await
    }

    /// Body of a response the driver must have served.
    pub fn body(res: Option<Response>) -> String {
        res.expect("driver should have served this request").body_text()
    }

    /// Trigger the idle scheduler and advance time far enough to run every
    /// queued task (the debounce threshold is covered by `by_ms`).
    pub async fn drain_idle(&self, by_ms: u64) {
        let driver = self.driver.clone();
        let trigger = tokio::spawn(async move { driver.idle().trigger().await });
        // Let the trigger arm its debounce timer before advancing.
        tokio::task::yield_now().await;
        self.adapter.advance(by_ms);
        trigger.await.expect("idle trigger");
        self.driver.idle().empty().await;
    }

    /// Run background work captured by `wait_until`, advancing time so
    /// delayed fetches complete.
    pub async fn drain_background(&self, by_ms: u64) {
        let context = self.context.clone();
        let drain = tokio::spawn(async move { context.drain().await });
        tokio::task::yield_now().await;
        self.adapter.advance(by_ms);
        drain.await.expect("background drain");
    }
}

/// Check the data-group invariants against persisted state: the LRU count
/// matches its map, the size bound holds, and every cached URL appears in
/// both the LRU and the age table.
pub async fn assert_data_group_invariants(storage: &Arc<MemoryBackend>, group: &str, max_size: u32) {
    use larder_worker::lru::LruState;

    let lru_store = storage
        .open(&format!("ngsw:db:data:{group}:lru"))
        .await
        .unwrap();
    let state: LruState = match lru_store
        .match_request(&Request::get("/lru"))
        .await
        .unwrap()
    {
        Some(res) => serde_json::from_slice(&res.body).unwrap(),
        None => LruState::default(),
    };
    assert_eq!(state.count as usize, state.map.len(), "lru count matches map");
    assert!(state.count <= max_size, "lru size within bound");

    let age_store = storage
        .open(&format!("ngsw:db:data:{group}:age"))
        .await
        .unwrap();
    let cache = storage.open(&format!("data:{group}:cache")).await.unwrap();
    for req in cache.keys().await.unwrap() {
        assert!(
            state.map.contains_key(&req.url),
            "cached url {} is tracked by the lru",
            req.url
        );
        let age_key = Request::get(format!("/{}", req.url));
        assert!(
            age_store.match_request(&age_key).await.unwrap().is_some(),
            "cached url {} has an age record",
            req.url
        );
    }
}
