//! Registration and the install/activate lifecycle.
//!
//! ```text
//! Registration (one per scope)
//!     ├── installing (ServiceWorker)
//!     ├── waiting    (ServiceWorker)  ← PendingUpdate
//!     └── active     (ServiceWorker)  ← controls clients
//! ```
//!
//! Install always precedes activate for a version, and only the active
//! version sees fetch, push and click events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::Clients;
use crate::fetch::FetchOutcome;
use crate::worker::{ControlMessage, EventOutcome, ServiceWorker, WorkerEvent};
use crate::SwError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script parsed, nothing run yet.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// An installed version that is not active yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub worker_id: ServiceWorkerId,
    pub version: String,
    /// Milliseconds since the epoch.
    pub installed_at: u64,
}

/// Registration events, as the page sees them.
#[derive(Debug, Clone)]
pub enum RegistrationEvent {
    /// A new version started installing.
    UpdateFound { worker_id: ServiceWorkerId, version: String },
    /// A version changed state.
    StateChange { worker_id: ServiceWorkerId, state: ServiceWorkerState },
    /// A version is installed and waiting for activation.
    UpdateWaiting(PendingUpdate),
    /// A new version now controls the clients.
    ControllerChange { worker_id: ServiceWorkerId, version: String },
    /// The active worker asked for an update check.
    UpdateCheckRequested,
    /// Every version was dropped.
    Unregistered,
}

/// Result of installing a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallResult {
    /// Installed and activated straight away.
    Activated,
    /// Installed and parked until skip-waiting.
    Waiting(PendingUpdate),
}

/// Something a worker can ask for a fresh update check.
#[async_trait]
pub trait UpdateRequester: Send + Sync {
    async fn request_update(&self);
}

/// Event channel of a registration, shared with its workers so they can
/// request update checks themselves.
#[derive(Debug)]
pub struct UpdateSignal {
    events: broadcast::Sender<RegistrationEvent>,
    checks: AtomicU64,
}

impl UpdateSignal {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            events,
            checks: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistrationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Record an update check. Returns the running total.
    pub fn request(&self) -> u64 {
        let checks = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(checks, "Update check requested");
        self.emit(RegistrationEvent::UpdateCheckRequested);
        checks
    }

    /// Update checks requested so far.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }
}

impl Default for UpdateSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateRequester for UpdateSignal {
    async fn request_update(&self) {
        self.request();
    }
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
}

/// A worker registration for one scope.
pub struct Registration {
    scope: Url,
    slots: RwLock<Slots>,
    /// Serializes install/activate transitions.
    transition: Mutex<()>,
    clients: Arc<Clients>,
    signal: Arc<UpdateSignal>,
}

impl Registration {
    pub fn new(scope: Url, clients: Arc<Clients>) -> Self {
        Self {
            scope,
            slots: RwLock::new(Slots::default()),
            transition: Mutex::new(()),
            clients,
            signal: Arc::new(UpdateSignal::new()),
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.signal.subscribe()
    }

    /// Handle for the `updates` seam of this registration's workers.
    pub fn updates(&self) -> Arc<UpdateSignal> {
        Arc::clone(&self.signal)
    }

    fn emit(&self, event: RegistrationEvent) {
        self.signal.emit(event);
    }

    fn set_state(&self, worker: &ServiceWorker, state: ServiceWorkerState) {
        worker.set_state(state);
        self.emit(RegistrationEvent::StateChange {
            worker_id: worker.id(),
            state,
        });
    }

    pub async fn installing(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.active.clone()
    }

    /// The waiting version, if any.
    pub async fn pending_update(&self) -> Option<PendingUpdate> {
        self.slots.read().await.waiting.as_deref().map(pending)
    }

    /// Number of update checks requested so far.
    pub fn update_checks(&self) -> u64 {
        self.signal.checks()
    }

    /// Install a new version.
    ///
    /// On failure the version becomes redundant and leaves nothing behind;
    /// the next page load retries.
    pub async fn install(&self, worker: Arc<ServiceWorker>) -> Result<InstallResult, SwError> {
        let _transition = self.transition.lock().await;

        self.slots.write().await.installing = Some(worker.clone());
        self.set_state(&worker, ServiceWorkerState::Installing);
        self.emit(RegistrationEvent::UpdateFound {
            worker_id: worker.id(),
            version: worker.version().to_string(),
        });

        if let Err(e) = worker.handle(WorkerEvent::Install).await {
            warn!(worker = ?worker.id(), error = %e, "Install failed");
            self.slots.write().await.installing = None;
            self.set_state(&worker, ServiceWorkerState::Redundant);
            return Err(e);
        }

        let (replaced, has_controller) = {
            let mut slots = self.slots.write().await;
            slots.installing = None;
            let replaced = slots.waiting.replace(worker.clone());
            (replaced, slots.active.is_some())
        };
        if let Some(old) = replaced {
            self.set_state(&old, ServiceWorkerState::Redundant);
        }
        self.set_state(&worker, ServiceWorkerState::Installed);

        if !has_controller || worker.skip_waiting_requested() {
            self.activate_waiting().await?;
            return Ok(InstallResult::Activated);
        }

        let pending = pending(&worker);
        info!(version = %pending.version, "Update waiting for activation");
        self.emit(RegistrationEvent::UpdateWaiting(pending.clone()));
        Ok(InstallResult::Waiting(pending))
    }

    /// Promote the waiting version. Callers hold `transition`.
    async fn activate_waiting(&self) -> Result<bool, SwError> {
        let (worker, previous) = {
            let mut slots = self.slots.write().await;
            let Some(worker) = slots.waiting.take() else {
                return Ok(false);
            };
            (worker, slots.active.clone())
        };

        self.set_state(&worker, ServiceWorkerState::Activating);
        if let Err(e) = worker.handle(WorkerEvent::Activate).await {
            warn!(worker = ?worker.id(), error = %e, "Activation failed");
            self.set_state(&worker, ServiceWorkerState::Redundant);
            return Err(e);
        }

        if let Some(old) = previous {
            self.set_state(&old, ServiceWorkerState::Redundant);
        }
        self.slots.write().await.active = Some(worker.clone());
        self.set_state(&worker, ServiceWorkerState::Activated);
        self.emit(RegistrationEvent::ControllerChange {
            worker_id: worker.id(),
            version: worker.version().to_string(),
        });
        Ok(true)
    }

    /// Deliver a client control message to the waiting version.
    ///
    /// Returns whether a version was activated; a message with nothing
    /// waiting is a no-op.
    pub async fn post_message(&self, message: ControlMessage) -> Result<bool, SwError> {
        let _transition = self.transition.lock().await;

        let Some(waiting) = self.waiting().await else {
            debug!(?message, "No waiting worker");
            return Ok(false);
        };

        match waiting.handle(WorkerEvent::Message(message)).await? {
            EventOutcome::SkipWaitingRequested => self.activate_waiting().await,
            _ => Ok(false),
        }
    }

    /// Route a functional event to the active version.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, SwError> {
        let Some(active) = self.active().await else {
            return match event {
                WorkerEvent::Fetch(_) => Ok(EventOutcome::Fetch(FetchOutcome::Passthrough)),
                other => Err(SwError::State(format!(
                    "no active worker for {}",
                    other.name()
                ))),
            };
        };

        active.handle(event).await
    }

    /// Record an update check.
    pub fn request_update(&self) {
        self.signal.request();
    }

    /// Drop every version. Returns whether anything was registered.
    pub async fn unregister(&self) -> bool {
        let _transition = self.transition.lock().await;

        let workers: Vec<Arc<ServiceWorker>> = {
            let mut slots = self.slots.write().await;
            [slots.installing.take(), slots.waiting.take(), slots.active.take()]
                .into_iter()
                .flatten()
                .collect()
        };

        for worker in &workers {
            self.clients.release(worker.id()).await;
            self.set_state(worker, ServiceWorkerState::Redundant);
        }

        if workers.is_empty() {
            return false;
        }
        self.emit(RegistrationEvent::Unregistered);
        true
    }
}

fn pending(worker: &ServiceWorker) -> PendingUpdate {
    PendingUpdate {
        worker_id: worker.id(),
        version: worker.version().to_string(),
        installed_at: worker.installed_at().unwrap_or_default(),
    }
}
