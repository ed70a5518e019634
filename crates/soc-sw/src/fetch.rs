//! Fetch Interceptor: network first, cache as fallback.
//!
//! 1. Cross-origin or non-GET requests are not intercepted.
//! 2. A network answer is returned as-is; a 200 `basic` non-redirected one
//!    is also written to the current cache.
//! 3. On network failure: exact cache match, then the app shell for
//!    navigations, then a synthetic 503.

use http::StatusCode;
use soc_common::with_timeout;
use soc_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};

use crate::cache::{CacheStore, CachedResponse, RequestKey};
use crate::config::WorkerConfig;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached app shell served for an offline navigation.
    Shell,
    /// Synthetic offline response.
    Offline,
}

/// Result of a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the page talks to the network directly.
    Passthrough,
    /// Answered by the worker.
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Passthrough => None,
            Self::Respond { response, .. } => Some(response),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Passthrough => None,
            Self::Respond { source, .. } => Some(*source),
        }
    }
}

/// Whether the worker handles this request at all.
pub fn should_intercept(config: &WorkerConfig, request: &Request) -> bool {
    request.method == http::Method::GET && request.url.origin() == config.origin.origin()
}

/// Only complete, same-origin, readable 200s are stored.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK && response.is_same_origin_basic()
}

/// Handle one fetch event.
pub async fn handle_fetch(
    config: &WorkerConfig,
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    request: &Request,
) -> FetchOutcome {
    if !should_intercept(config, request) {
        trace!(url = %request.url, method = %request.method, "Not intercepted");
        return FetchOutcome::Passthrough;
    }

    let cache_name = config.cache_name();

    let network = with_timeout(config.network_timeout(), || fetcher.fetch(request)).await;
    match network {
        Ok(Ok(response)) => {
            if is_cacheable(&response) {
                if let Some(key) = RequestKey::for_request(request) {
                    let snapshot = CachedResponse::from_response(&response);
                    if let Err(e) = store.put(&cache_name, key, snapshot).await {
                        warn!(url = %request.url, error = %e, "Cache write failed");
                    }
                }
            } else {
                trace!(
                    url = %request.url,
                    status = %response.status,
                    response_type = ?response.response_type,
                    redirected = response.redirected,
                    "Response not cacheable"
                );
            }
            FetchOutcome::Respond {
                response,
                source: ResponseSource::Network,
            }
        }
        Ok(Err(e)) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");
            from_cache(config, store, &cache_name, request).await
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network timed out, trying cache");
            from_cache(config, store, &cache_name, request).await
        }
    }
}

async fn from_cache(
    config: &WorkerConfig,
    store: &dyn CacheStore,
    cache_name: &str,
    request: &Request,
) -> FetchOutcome {
    let key = RequestKey::get(&request.url);
    if let Some(hit) = lookup(store, cache_name, &key).await {
        return FetchOutcome::Respond {
            response: hit.to_response(),
            source: ResponseSource::Cache,
        };
    }

    if request.is_navigation() {
        if let Ok(shell_url) = config.resolve(&config.shell_path) {
            if let Some(shell) = lookup(store, cache_name, &RequestKey::get(&shell_url)).await {
                debug!(url = %request.url, "Serving cached shell");
                return FetchOutcome::Respond {
                    response: shell.to_response(),
                    source: ResponseSource::Shell,
                };
            }
        }
    }

    FetchOutcome::Respond {
        response: Response::offline(request.url.clone(), &config.offline_body),
        source: ResponseSource::Offline,
    }
}

async fn lookup(store: &dyn CacheStore, cache_name: &str, key: &RequestKey) -> Option<CachedResponse> {
    store
        .match_request(cache_name, key)
        .await
        .unwrap_or_else(|e| {
            warn!(url = %key.url, error = %e, "Cache lookup failed");
            None
        })
}
