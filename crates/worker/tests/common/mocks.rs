//! Mock implementations of the runtime collaborator traits.

use async_trait::async_trait;
use futures::future::BoxFuture;
use larder_core::{Manifest, Request, Response, urls};
use larder_worker::adapter::{Adapter, EventContext};
use larder_worker::error::{Error, Result};
use larder_worker::transport::NetworkTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Manually advanced clock with timers that fire as time passes.
pub struct MockAdapter {
    now: AtomicU64,
    nonce: AtomicU64,
    timers: Mutex<Vec<MockTimer>>,
}

struct MockTimer {
    due: u64,
    tx: oneshot::Sender<()>,
}

impl MockAdapter {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(start_ms),
            nonce: AtomicU64::new(0),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Move the clock forward, firing every timer that comes due.
    pub fn advance(&self, ms: u64) {
        let now = self.now.fetch_add(ms, Ordering::SeqCst) + ms;
        let mut timers = self.timers.lock().unwrap();
        let mut remaining = Vec::new();
        for timer in timers.drain(..) {
            if timer.due <= now {
                let _ = timer.tx.send(());
            } else {
                remaining.push(timer);
            }
        }
        *timers = remaining;
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn timeout(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let due = self.now_ms() + ms;
        let (tx, rx) = oneshot::channel();
        self.timers.lock().unwrap().push(MockTimer { due, tx });
        let _ = rx.await;
    }

    fn cache_bust_nonce(&self) -> String {
        format!("nonce-{}", self.nonce.fetch_add(1, Ordering::SeqCst))
    }
}

/// Scripted origin server behind the transport seam.
///
/// Routes are keyed by path; the query string (cache-bust included) is
/// ignored for matching but preserved in the request log. A path may be
/// served as a sequence: each request consumes one scripted response, and
/// the last one repeats.
pub struct MockServer {
    adapter: Arc<MockAdapter>,
    routes: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    log: Mutex<Vec<Request>>,
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
    /// Delay before responding, driven by the mock adapter's clock.
    pub delay_ms: Option<u64>,
}

impl MockResponse {
    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            headers: Vec::new(),
            delay_ms: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = Some(ms);
        self
    }
}

impl MockServer {
    pub fn new(adapter: Arc<MockAdapter>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            routes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Serve a 200 text body at a path, replacing any previous script.
    pub fn serve(&self, path: &str, body: &str) {
        self.serve_with(path, MockResponse::text(body));
    }

    pub fn serve_with(&self, path: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), VecDeque::from([response]));
    }

    /// Serve a sequence of responses; the last one repeats.
    pub fn serve_sequence(&self, path: &str, responses: Vec<MockResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), VecDeque::from(responses));
    }

    pub fn serve_manifest(&self, manifest: &Manifest) {
        let body = serde_json::to_string(manifest).expect("manifest serializes");
        self.serve(larder_core::MANIFEST_URL, &body);
    }

    pub fn remove(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Full request URLs as received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }

    /// Number of requests for a path, ignoring query strings.
    pub fn request_count(&self, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| urls::path_only(&r.url) == path)
            .count()
    }

    /// Assert the server saw exactly these paths (unordered, with
    /// multiplicity), ignoring query strings.
    pub fn assert_saw_exactly(&self, expected: &[&str]) {
        let mut seen: Vec<String> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|r| urls::path_only(&r.url).to_string())
            .collect();
        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected, "unexpected set of server requests");
    }
}

#[async_trait]
impl NetworkTransport for MockServer {
    async fn fetch(&self, req: &Request) -> Result<Response> {
        self.log.lock().unwrap().push(req.clone());

        let path = urls::path_only(&req.url).to_string();
        let scripted = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&path) {
                Some(sequence) => {
                    let next = if sequence.len() > 1 {
                        sequence.pop_front()
                    } else {
                        sequence.front().cloned()
                    };
                    Some(next.ok_or_else(|| Error::Network {
                        url: req.url.clone(),
                        reason: "empty response script".to_string(),
                    })?)
                }
                None => None,
            }
        };

        let Some(scripted) = scripted else {
            // Unknown path: an HTTP-level 404, not a network failure.
            return Ok(Response::new(404).with_body("not found"));
        };

        if let Some(delay) = scripted.delay_ms {
            self.adapter.timeout(delay).await;
        }

        let mut response = Response::new(scripted.status).with_body(scripted.body);
        for (name, value) in &scripted.headers {
            response.headers.set(name, value.clone());
        }
        Ok(response)
    }
}

/// A transport that always fails at the network level.
pub struct DownServer;

#[async_trait]
impl NetworkTransport for DownServer {
    async fn fetch(&self, req: &Request) -> Result<Response> {
        Err(Error::Network {
            url: req.url.clone(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Collects background work handed to `wait_until` so tests can run it at a
/// chosen moment.
#[derive(Default)]
pub struct MockContext {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl MockContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run all collected background work to completion, including work
    /// queued while draining.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<BoxFuture<'static, ()>> =
                std::mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                return;
            }
            for task in batch {
                task.await;
            }
        }
    }
}

impl EventContext for MockContext {
    fn wait_until(&self, fut: BoxFuture<'static, ()>) {
        self.tasks.lock().unwrap().push(fut);
    }
}
