//! Cache Store: named, versioned request/response stores.
//!
//! ```text
//! CacheStore
//!     └── "soc-de-poble-v3" (Cache)
//!             └── RequestKey (GET, url) → CachedResponse
//! ```
//!
//! Every write inserts a complete snapshot under a single lock, so a reader
//! never sees a half-written entry. `put_all` commits a whole batch or
//! nothing.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use soc_net::{Request, Response, ResponseType};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::SwError;

/// Cache key: only GET requests are cacheable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Key for a GET request to `url`.
    pub fn get(url: &Url) -> Self {
        Self {
            method: Method::GET,
            url: url.as_str().to_string(),
        }
    }

    /// Key for `request`, or `None` if it is not a GET.
    pub fn for_request(request: &Request) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::get(&request.url))
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub url: Url,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Milliseconds since the epoch.
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot a response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            response_type: response.response_type,
            cached_at: now_ms(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.url.clone(), self.status, self.body.clone())
            .with_type(self.response_type);
        response.status_text = self.status_text.clone();
        response.headers = self.headers.clone();
        response
    }
}

/// A single named cache.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    pub name: String,
    entries: HashMap<RequestKey, CachedResponse>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_request(&self, key: &RequestKey) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: RequestKey, entry: CachedResponse) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Origin-scoped storage of named caches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the cache if absent.
    async fn open(&self, name: &str) -> Result<(), SwError>;

    async fn has(&self, name: &str) -> Result<bool, SwError>;

    /// All cache names.
    async fn keys(&self) -> Result<Vec<String>, SwError>;

    /// Delete a cache; `Ok(false)` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;

    /// Store one entry, creating the cache if needed.
    async fn put(&self, name: &str, key: RequestKey, entry: CachedResponse)
        -> Result<(), SwError>;

    /// Store a batch atomically.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), SwError>;

    /// Exact match in one cache.
    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, SwError>;

    /// Number of entries in a cache (0 if absent).
    async fn entry_count(&self, name: &str) -> Result<usize, SwError>;
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CachedResponse,
    ) -> Result<(), SwError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(key, entry);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        for (key, entry) in entries {
            cache.put(key, entry);
        }
        Ok(())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, SwError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn entry_count(&self, name: &str) -> Result<usize, SwError> {
        Ok(self.caches.read().await.get(name).map_or(0, Cache::len))
    }
}

/// Outcome of a best-effort purge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Delete every cache. A failing deletion is logged and skipped.
pub async fn purge_all(store: &dyn CacheStore) -> PurgeReport {
    purge_where(store, |_| true).await
}

/// Delete every cache except `keep`.
pub async fn purge_except(store: &dyn CacheStore, keep: &str) -> PurgeReport {
    purge_where(store, |name| name != keep).await
}

async fn purge_where(store: &dyn CacheStore, doomed: impl Fn(&str) -> bool) -> PurgeReport {
    let mut report = PurgeReport::default();

    let names = match store.keys().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Could not enumerate caches");
            return report;
        }
    };

    for name in names.into_iter().filter(|n| doomed(n)) {
        match store.delete(&name).await {
            Ok(_) => {
                debug!(cache = %name, "Deleted cache");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(cache = %name, error = %e, "Failed to delete cache");
                report.failed.push(name);
            }
        }
    }

    if !report.deleted.is_empty() {
        info!(deleted = report.deleted.len(), failed = report.failed.len(), "Purged caches");
    }
    report
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
