//! Named-table persistence over the response store.
//!
//! The worker persists its state in the same store that holds cache bodies:
//! table `t` is the store named `ngsw:db:t`, and key `k` within it is
//! addressed by a synthesized GET request for `/k`. Values are JSON.

use crate::error::{Error, Result};
use larder_core::{DB_PREFIX, Request, Response};
use larder_storage::{CacheStorage, NamedCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Handle to the set of named tables.
pub struct Database {
    storage: Arc<dyn CacheStorage>,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl Database {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Open a table, creating it if absent. Handles are cached, so repeated
    /// opens of the same name are cheap and address the same table.
    pub async fn open(&self, name: &str) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.lock().unwrap().get(name) {
            return Ok(table.clone());
        }
        let cache = self.storage.open(&format!("{DB_PREFIX}{name}")).await?;
        let table = Arc::new(Table {
            name: name.to_string(),
            cache,
        });
        self.tables
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| table.clone());
        Ok(table)
    }

    /// Delete a table and all its entries.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.tables.lock().unwrap().remove(name);
        Ok(self.storage.delete(&format!("{DB_PREFIX}{name}")).await?)
    }

    /// List table names.
    pub async fn list(&self) -> Result<Vec<String>> {
        let names = self.storage.list().await?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix(DB_PREFIX).map(str::to_string))
            .collect())
    }
}

/// One named table of JSON values.
pub struct Table {
    name: String,
    cache: Arc<dyn NamedCache>,
}

impl Table {
    fn key_request(key: &str) -> Request {
        Request::get(format!("/{key}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and deserialize the value for `key`.
    ///
    /// A missing key is the tagged [`Error::NotFound`]; a present but
    /// undecodable value surfaces as a serialization error.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.cache.match_request(&Self::key_request(key)).await? {
            Some(res) => Ok(serde_json::from_slice(&res.body)?),
            None => Err(Error::NotFound(format!("{}:{key}", self.name))),
        }
    }

    /// Serialize and write a value for `key`.
    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.cache
            .put(&Self::key_request(key), Response::ok_with_body(body))
            .await?;
        Ok(())
    }

    /// Remove the entry for `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.delete(&Self::key_request(key)).await?)
    }

    /// List the keys in this table.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let reqs = self.cache.keys().await?;
        Ok(reqs
            .into_iter()
            .filter_map(|req| req.url.strip_prefix('/').map(str::to_string))
            .collect())
    }
}
