//! One worker version and its event dispatch table.
//!
//! Each event kind maps to one handler; the returned future is the work the
//! host must await before it may tear the worker down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use soc_common::with_timeout;
use soc_net::{Fetcher, Request};
use tracing::{debug, info, info_span, Instrument};

use crate::cache::{now_ms, purge_except, CacheStore, CachedResponse, PurgeReport, RequestKey};
use crate::click::{handle_click, ClickResolution, NotificationClickEvent};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::fetch::{handle_fetch, FetchOutcome};
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState, UpdateRequester};
use crate::notification::Notifications;
use crate::push::{handle_push, PushOutcome};
use crate::SwError;

/// Client → worker control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// `{ "type": "SKIP_WAITING" }`
    SkipWaiting,
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Result<Self, SwError> {
        serde_json::from_str(raw).map_err(|e| SwError::InvalidMessage(e.to_string()))
    }
}

/// Events delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Bytes>),
    NotificationClick(NotificationClickEvent),
    Message(ControlMessage),
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Push(_) => "push",
            Self::NotificationClick(_) => "notificationclick",
            Self::Message(_) => "message",
        }
    }
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed { cache_name: String, assets: usize },
    Activated { purged: PurgeReport, claimed: usize },
    Fetch(FetchOutcome),
    Push(PushOutcome),
    Click(ClickResolution),
    SkipWaitingRequested,
}

/// Shared, origin-wide resources a worker operates on.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn CacheStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<Clients>,
    pub notifications: Arc<Notifications>,
    /// Where push handlers send update-check requests.
    pub updates: Arc<dyn UpdateRequester>,
}

/// A single worker version.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    context: WorkerContext,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    /// Milliseconds since the epoch, zero until installed.
    installed_at: AtomicU64,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.config.cache_version)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceWorker {
    pub fn new(config: Arc<WorkerConfig>, context: WorkerContext) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            config,
            context,
            state: RwLock::new(ServiceWorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            installed_at: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.config.cache_version
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub fn state(&self) -> ServiceWorkerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ServiceWorkerState) {
        debug!(worker = ?self.id, ?state, "Worker state change");
        if state == ServiceWorkerState::Installed {
            self.installed_at.store(now_ms(), Ordering::SeqCst);
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// When this version finished installing.
    pub fn installed_at(&self) -> Option<u64> {
        match self.installed_at.load(Ordering::SeqCst) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    /// Ask to leave the waiting phase as soon as installed.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Dispatch one event.
    pub async fn handle(&self, event: WorkerEvent) -> Result<EventOutcome, SwError> {
        let span = info_span!("sw_event", worker = ?self.id, event = event.name());
        self.dispatch(event).instrument(span).await
    }

    async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, SwError> {
        let state = self.state();
        if state == ServiceWorkerState::Redundant {
            return Err(SwError::State(format!(
                "{} delivered to redundant worker",
                event.name()
            )));
        }

        match event {
            WorkerEvent::Install => {
                self.expect_state(state, ServiceWorkerState::Installing)?;
                self.on_install().await
            }
            WorkerEvent::Activate => {
                self.expect_state(state, ServiceWorkerState::Activating)?;
                self.on_activate().await
            }
            WorkerEvent::Fetch(request) => {
                if state != ServiceWorkerState::Activated {
                    return Ok(EventOutcome::Fetch(FetchOutcome::Passthrough));
                }
                let ctx = &self.context;
                Ok(EventOutcome::Fetch(
                    handle_fetch(&self.config, ctx.store.as_ref(), ctx.fetcher.as_ref(), &request)
                        .await,
                ))
            }
            WorkerEvent::Push(raw) => {
                self.expect_state(state, ServiceWorkerState::Activated)?;
                let ctx = &self.context;
                Ok(EventOutcome::Push(
                    handle_push(
                        &self.config,
                        ctx.store.as_ref(),
                        &ctx.notifications,
                        ctx.updates.as_ref(),
                        raw.as_deref(),
                    )
                    .await,
                ))
            }
            WorkerEvent::NotificationClick(click) => {
                self.expect_state(state, ServiceWorkerState::Activated)?;
                let ctx = &self.context;
                let resolution =
                    handle_click(&self.config, &ctx.clients, &ctx.notifications, click, now_ms())
                        .await?;
                Ok(EventOutcome::Click(resolution))
            }
            WorkerEvent::Message(ControlMessage::SkipWaiting) => {
                self.skip_waiting();
                Ok(EventOutcome::SkipWaitingRequested)
            }
        }
    }

    fn expect_state(
        &self,
        actual: ServiceWorkerState,
        expected: ServiceWorkerState,
    ) -> Result<(), SwError> {
        if actual == expected {
            Ok(())
        } else {
            Err(SwError::State(format!(
                "worker is {actual:?}, expected {expected:?}"
            )))
        }
    }

    /// Pre-cache the manifest. Nothing is written unless every asset loaded.
    async fn on_install(&self) -> Result<EventOutcome, SwError> {
        let cache_name = self.config.cache_name();
        let timeout = self.config.network_timeout();
        let fetcher = self.context.fetcher.as_ref();

        let mut entries = Vec::with_capacity(self.config.precache_manifest.len());
        for path in &self.config.precache_manifest {
            let url = self.config.resolve(path)?;
            let request = Request::get(url);

            let response = with_timeout(timeout, || fetcher.fetch(&request))
                .await
                .map_err(|e| SwError::install(path, e))?
                .map_err(|e| SwError::install(path, e))?;
            if !response.ok() {
                return Err(SwError::install(path, format!("status {}", response.status)));
            }

            entries.push((
                RequestKey::get(&request.url),
                CachedResponse::from_response(&response),
            ));
        }

        let assets = entries.len();
        self.context.store.put_all(&cache_name, entries).await?;
        info!(cache = %cache_name, assets, "Pre-cached static assets");

        if self.config.skip_waiting_on_install {
            self.skip_waiting();
        }

        Ok(EventOutcome::Installed { cache_name, assets })
    }

    /// Drop stale caches, then take control of every open client.
    async fn on_activate(&self) -> Result<EventOutcome, SwError> {
        let current = self.config.cache_name();
        let purged = purge_except(self.context.store.as_ref(), &current).await;
        let claimed = self.context.clients.claim(self.id).await;
        info!(
            cache = %current,
            purged = purged.deleted.len(),
            claimed,
            "Activated"
        );
        Ok(EventOutcome::Activated { purged, claimed })
    }
}
