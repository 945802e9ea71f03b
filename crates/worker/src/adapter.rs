//! Runtime collaborator traits.
//!
//! The worker core never touches the system clock, timers, randomness, or
//! task spawning directly; it goes through these seams so tests can supply
//! deterministic implementations.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock, timer, and randomness provided by the embedding runtime.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Millisecond clock. Must be monotonically non-decreasing within one
    /// worker lifetime.
    fn now_ms(&self) -> u64;

    /// Resolve after `ms` milliseconds.
    async fn timeout(&self, ms: u64);

    /// Random value for cache-busting query strings.
    fn cache_bust_nonce(&self) -> String;
}

/// Production adapter: system time, tokio timers, thread-local randomness.
#[derive(Default)]
pub struct SystemAdapter;

#[async_trait]
impl Adapter for SystemAdapter {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn timeout(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    fn cache_bust_nonce(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect()
    }
}

/// Hook for extending worker lifetime past the current event.
///
/// `wait_until` corresponds to the interceptor's lifetime-extension promise:
/// background work (deferred cache writes, post-timeout fetch completion)
/// is handed to the runtime rather than silently dropped.
pub trait EventContext: Send + Sync {
    fn wait_until(&self, fut: BoxFuture<'static, ()>);
}

/// Production context: background work is spawned onto the tokio runtime.
#[derive(Default)]
pub struct TokioContext;

impl EventContext for TokioContext {
    fn wait_until(&self, fut: BoxFuture<'static, ()>) {
        tokio::spawn(fut);
    }
}
