//! In-memory storage backend.
//!
//! Backs tests and embedders that do not need persistence. Entries live in
//! plain maps behind std mutexes; no lock is held across an await point.

use crate::error::StorageResult;
use crate::traits::{CacheStorage, NamedCache};
use async_trait::async_trait;
use larder_core::{Method, Request, Response};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type EntryKey = (String, Method);

/// In-memory cache storage.
#[derive(Default)]
pub struct MemoryBackend {
    caches: Mutex<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CacheStorage for MemoryBackend {
    async fn open(&self, name: &str) -> StorageResult<Arc<dyn NamedCache>> {
        let mut caches = self.caches.lock().unwrap();
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::default()))
            .clone();
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        Ok(self.caches.lock().unwrap().remove(name).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.caches.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// One in-memory named cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<EntryKey, Response>>,
}

#[async_trait]
impl NamedCache for MemoryCache {
    async fn put(&self, req: &Request, res: Response) -> StorageResult<()> {
        let key = (req.url.clone(), req.method.clone());
        self.entries.lock().unwrap().insert(key, res);
        Ok(())
    }

    async fn match_request(&self, req: &Request) -> StorageResult<Option<Response>> {
        let key = (req.url.clone(), req.method.clone());
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    async fn delete(&self, req: &Request) -> StorageResult<bool> {
        let key = (req.url.clone(), req.method.clone());
        Ok(self.entries.lock().unwrap().remove(&key).is_some())
    }

    async fn keys(&self) -> StorageResult<Vec<Request>> {
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<Request> = entries
            .keys()
            .map(|(url, method)| Request::new(method.clone(), url.clone()))
            .collect();
        keys.sort_by(|a, b| (&a.url, a.method.as_str()).cmp(&(&b.url, b.method.as_str())));
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_is_idempotent() {
        let backend = MemoryBackend::new();
        let a = backend.open("data:api:cache").await.unwrap();
        a.put(&Request::get("/api/a"), Response::ok_with_body("a"))
            .await
            .unwrap();

        let b = backend.open("data:api:cache").await.unwrap();
        let hit = b.match_request(&Request::get("/api/a")).await.unwrap();
        assert_eq!(hit.unwrap().body_text(), "a");
    }

    #[tokio::test]
    async fn entries_are_keyed_by_url_and_method() {
        let backend = MemoryBackend::new();
        let cache = backend.open("c").await.unwrap();
        let get = Request::get("/x");
        let head = Request::new(Method::Head, "/x");

        cache.put(&get, Response::ok_with_body("body")).await.unwrap();
        cache.put(&head, Response::new(200)).await.unwrap();

        assert_eq!(cache.keys().await.unwrap().len(), 2);
        assert!(cache.delete(&get).await.unwrap());
        assert!(cache.match_request(&get).await.unwrap().is_none());
        assert!(cache.match_request(&head).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_missing_cache_reports_false() {
        let backend = MemoryBackend::new();
        assert!(!backend.delete("nope").await.unwrap());
        backend.open("yes").await.unwrap();
        assert!(backend.delete("yes").await.unwrap());
        assert!(backend.list().await.unwrap().is_empty());
    }
}
