//! Page-side update bridge.
//!
//! Watches the registration for a waiting version and offers two ways out:
//! hand control to the new version, or wipe the session and start over.

use std::sync::Arc;

use async_trait::async_trait;
use soc_common::SocError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{purge_all, CacheStore, PurgeReport};
use crate::lifecycle::{Registration, RegistrationEvent};
use crate::worker::ControlMessage;
use crate::SwError;

/// The update prompt as the page renders it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdatePrompt {
    #[default]
    Hidden,
    /// Persistent; only a controller change hides it.
    Visible { version: String },
}

impl UpdatePrompt {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible { .. })
    }
}

/// Page-level session operations used by a full reset.
#[async_trait]
pub trait AppShell: Send + Sync {
    async fn sign_out(&self) -> Result<(), SocError>;

    /// Clear local and session storage.
    async fn clear_local_state(&self) -> Result<(), SocError>;

    async fn navigate(&self, path: &str) -> Result<(), SocError>;
}

/// What a session reset managed to do.
#[derive(Debug, Default, Clone)]
pub struct ResetReport {
    pub signed_out: bool,
    pub local_state_cleared: bool,
    pub caches: PurgeReport,
    pub unregistered: bool,
    pub navigated: bool,
    /// One line per failed step.
    pub errors: Vec<String>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.caches.failed.is_empty()
    }
}

/// Bridges registration events to the update prompt.
pub struct UpdateBridge {
    registration: Arc<Registration>,
    store: Arc<dyn CacheStore>,
    prompt: watch::Sender<UpdatePrompt>,
}

impl UpdateBridge {
    pub fn new(registration: Arc<Registration>, store: Arc<dyn CacheStore>) -> Self {
        let (prompt, _) = watch::channel(UpdatePrompt::Hidden);
        Self {
            registration,
            store,
            prompt,
        }
    }

    pub fn prompt(&self) -> UpdatePrompt {
        self.prompt.borrow().clone()
    }

    /// Follow prompt changes.
    pub fn watch(&self) -> watch::Receiver<UpdatePrompt> {
        self.prompt.subscribe()
    }

    fn set_prompt(&self, next: UpdatePrompt) {
        self.prompt.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(?next, "Update prompt changed");
            *current = next;
            true
        });
    }

    /// Apply one registration event to the prompt.
    pub fn observe(&self, event: &RegistrationEvent) {
        match event {
            RegistrationEvent::UpdateWaiting(pending) => {
                info!(version = %pending.version, "New version available");
                self.set_prompt(UpdatePrompt::Visible {
                    version: pending.version.clone(),
                });
            }
            RegistrationEvent::ControllerChange { .. } | RegistrationEvent::Unregistered => {
                self.set_prompt(UpdatePrompt::Hidden);
            }
            _ => {}
        }
    }

    /// Re-read the registration, for when events were missed.
    pub async fn sync(&self) {
        match self.registration.pending_update().await {
            Some(pending) => self.set_prompt(UpdatePrompt::Visible {
                version: pending.version,
            }),
            None => self.set_prompt(UpdatePrompt::Hidden),
        }
    }

    /// Follow the registration in a background task.
    ///
    /// Only events from this point on are seen; call [`sync`](Self::sync)
    /// first to pick up a version that is already waiting.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.registration.subscribe();
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => bridge.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Update bridge lagged, resyncing");
                        bridge.sync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Ask the waiting version to take over.
    ///
    /// Returns whether a version was activated; calling it again, or with
    /// nothing waiting, does nothing.
    pub async fn apply_update(&self) -> Result<bool, SwError> {
        let activated = self
            .registration
            .post_message(ControlMessage::SkipWaiting)
            .await?;
        if activated {
            self.set_prompt(UpdatePrompt::Hidden);
        }
        Ok(activated)
    }

    /// Sign out, clear local state and caches, unregister, go home.
    ///
    /// Every step runs even when an earlier one failed.
    pub async fn reset_session(&self, shell: &dyn AppShell) -> ResetReport {
        let mut report = ResetReport::default();

        match shell.sign_out().await {
            Ok(()) => report.signed_out = true,
            Err(e) => report.errors.push(format!("sign out: {e}")),
        }
        match shell.clear_local_state().await {
            Ok(()) => report.local_state_cleared = true,
            Err(e) => report.errors.push(format!("clear local state: {e}")),
        }

        report.caches = purge_all(self.store.as_ref()).await;
        report.unregistered = self.registration.unregister().await;
        self.set_prompt(UpdatePrompt::Hidden);

        match shell.navigate("/").await {
            Ok(()) => report.navigated = true,
            Err(e) => report.errors.push(format!("navigate: {e}")),
        }

        if report.is_clean() {
            info!("Session reset");
        } else {
            warn!(errors = ?report.errors, failed_caches = ?report.caches.failed, "Session reset with errors");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clients::Clients;
    use crate::lifecycle::{PendingUpdate, ServiceWorkerId};
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct RecordingShell {
        steps: Mutex<Vec<String>>,
        fail_sign_out: bool,
    }

    #[async_trait]
    impl AppShell for RecordingShell {
        async fn sign_out(&self) -> Result<(), SocError> {
            self.steps.lock().unwrap().push("sign_out".into());
            if self.fail_sign_out {
                return Err(SocError::network("auth backend unreachable"));
            }
            Ok(())
        }

        async fn clear_local_state(&self) -> Result<(), SocError> {
            self.steps.lock().unwrap().push("clear".into());
            Ok(())
        }

        async fn navigate(&self, path: &str) -> Result<(), SocError> {
            self.steps.lock().unwrap().push(format!("navigate {path}"));
            Ok(())
        }
    }

    fn bridge() -> (UpdateBridge, Arc<dyn CacheStore>) {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let registration = Arc::new(Registration::new(
            Url::parse("http://localhost:5173/").unwrap(),
            Arc::new(Clients::new()),
        ));
        (UpdateBridge::new(registration, store.clone()), store)
    }

    fn waiting(version: &str) -> RegistrationEvent {
        RegistrationEvent::UpdateWaiting(PendingUpdate {
            worker_id: ServiceWorkerId::new(),
            version: version.into(),
            installed_at: 0,
        })
    }

    #[test]
    fn test_prompt_persists_until_controller_change() {
        let (bridge, _) = bridge();
        bridge.observe(&waiting("v2"));
        bridge.observe(&RegistrationEvent::UpdateCheckRequested);
        assert_eq!(
            bridge.prompt(),
            UpdatePrompt::Visible {
                version: "v2".into()
            }
        );

        bridge.observe(&RegistrationEvent::ControllerChange {
            worker_id: ServiceWorkerId::new(),
            version: "v2".into(),
        });
        assert_eq!(bridge.prompt(), UpdatePrompt::Hidden);
    }

    #[tokio::test]
    async fn test_apply_update_with_nothing_waiting() {
        let (bridge, _) = bridge();
        assert!(!bridge.apply_update().await.unwrap());
        assert!(!bridge.apply_update().await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_runs_every_step() {
        let (bridge, store) = bridge();
        store.open("soc-de-poble-v1").await.unwrap();
        store.open("other").await.unwrap();
        let shell = RecordingShell {
            fail_sign_out: true,
            ..Default::default()
        };

        let report = bridge.reset_session(&shell).await;

        assert!(!report.signed_out);
        assert!(report.local_state_cleared);
        assert!(report.navigated);
        assert_eq!(report.caches.deleted.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(
            *shell.steps.lock().unwrap(),
            vec!["sign_out", "clear", "navigate /"]
        );

        // Again, from a stale UI.
        let again = bridge.reset_session(&RecordingShell::default()).await;
        assert!(again.is_clean());
        assert!(again.caches.deleted.is_empty());
    }
}
