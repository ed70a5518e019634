//! In-memory network double.
//!
//! Used by the test suites and by the CLI simulator, which runs the worker
//! without touching the real backend. Built with the `testing` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use http::StatusCode;
use soc_net::{Fetcher, NetError, Request, Response};
use url::Url;

/// A fetcher answering from a script of canned responses.
///
/// Unknown URLs get a 404. While offline every request fails.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a 200 `basic` response.
    pub fn ok(&self, url: &Url, body: &str) {
        let response = Response::new(url.clone(), StatusCode::OK, body.to_string());
        self.respond(url, response);
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &Url, response: Response) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.as_str().to_string(), response);
    }

    /// Make requests to `url` fail at the network level.
    pub fn fail(&self, url: &Url) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.as_str().to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    /// Number of requests seen.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = request.url.as_str();
        if self.offline.load(Ordering::SeqCst)
            || self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(key)
        {
            return Err(NetError::RequestFailed(format!("{key}: network unreachable")));
        }

        let scripted = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        Ok(scripted.unwrap_or_else(|| {
            Response::new(request.url.clone(), StatusCode::NOT_FOUND, "Not Found")
        }))
    }
}
