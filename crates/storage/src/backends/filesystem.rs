//! Local filesystem storage backend.
//!
//! Each named cache is a directory under the root; each entry is a metadata
//! JSON file plus a raw body file, keyed by the SHA-1 of the entry's method
//! and URL. Writes go through a temp file and rename. The body is written
//! before the metadata, so a metadata file always refers to a complete body.

use crate::error::{StorageError, StorageResult};
use crate::traits::{CacheStorage, NamedCache};
use async_trait::async_trait;
use bytes::Bytes;
use larder_core::{ContentHash, Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Filesystem-backed cache storage.
pub struct FilesystemBackend {
    root: PathBuf,
}

/// Monotonic suffix for temp files, so concurrent writes never collide.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Arc::new(Self { root }))
    }

    /// Resolve a cache name to its directory, rejecting names that could
    /// escape the root.
    fn cache_dir(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open(&self, name: &str) -> StorageResult<Arc<dyn NamedCache>> {
        let dir = self.cache_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(FilesystemCache { dir }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, name: &str) -> StorageResult<bool> {
        let dir = self.cache_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// One directory-backed named cache.
pub struct FilesystemCache {
    dir: PathBuf,
}

/// Persisted entry metadata; the body lives in a sibling file.
#[derive(Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    method: String,
    status: u16,
    headers: BTreeMap<String, String>,
}

impl FilesystemCache {
    /// Stable file stem for an entry: SHA-1 over method and URL.
    fn entry_stem(req: &Request) -> String {
        ContentHash::compute(format!("{} {}", req.method.as_str(), req.url).as_bytes()).to_hex()
    }

    fn meta_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.meta.json"))
    }

    fn body_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.body"))
    }

    /// Write data to a temp file, then rename into place.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("tmp.{seq}"));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl NamedCache for FilesystemCache {
    #[instrument(skip(self, res), fields(url = %req.url, size = res.body.len()))]
    async fn put(&self, req: &Request, res: Response) -> StorageResult<()> {
        let stem = Self::entry_stem(req);
        let meta = EntryMeta {
            url: req.url.clone(),
            method: req.method.as_str().to_string(),
            status: res.status,
            headers: res
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        Self::write_atomic(&self.body_path(&stem), &res.body).await?;
        Self::write_atomic(&self.meta_path(&stem), &serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(url = %req.url))]
    async fn match_request(&self, req: &Request) -> StorageResult<Option<Response>> {
        let stem = Self::entry_stem(req);
        let meta_bytes = match fs::read(self.meta_path(&stem)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let meta: EntryMeta =
            serde_json::from_slice(&meta_bytes).map_err(|e| StorageError::Corrupt {
                key: req.url.clone(),
                reason: e.to_string(),
            })?;
        let body = fs::read(self.body_path(&stem)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::Corrupt {
                    key: req.url.clone(),
                    reason: "metadata present but body missing".to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;

        let mut response = Response::new(meta.status).with_body(Bytes::from(body));
        for (name, value) in meta.headers {
            response.headers.set(&name, value);
        }
        Ok(Some(response))
    }

    #[instrument(skip(self), fields(url = %req.url))]
    async fn delete(&self, req: &Request) -> StorageResult<bool> {
        let stem = Self::entry_stem(req);
        let existed = match fs::remove_file(self.meta_path(&stem)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::Io(e)),
        };
        match fs::remove_file(self.body_path(&stem)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn keys(&self) -> StorageResult<Vec<Request>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".meta.json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            let meta: EntryMeta =
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    key: name.to_string(),
                    reason: e.to_string(),
                })?;
            keys.push(Request::new(Method::parse(&meta.method), meta.url));
        }
        keys.sort_by(|a, b| (&a.url, a.method.as_str()).cmp(&(&b.url, b.method.as_str())));
        Ok(keys)
    }
}
