//! End-to-end worker scenarios: install, activate, offline, push, click, update.

use std::sync::Arc;

use soc_net::Request;
use soc_sw::testing::ScriptedFetcher;
use soc_sw::{
    CacheStore, ClickResolution, Client, Clients, EventOutcome, InstallResult, MemoryCacheStore,
    NotificationClickEvent, Notifications, Registration, ResponseSource, ServiceWorker,
    ServiceWorkerState, UpdateBridge, UpdatePrompt, WorkerConfig, WorkerContext, WorkerEvent,
    REPAIR_INDICATOR,
};

struct World {
    fetcher: Arc<ScriptedFetcher>,
    store: Arc<MemoryCacheStore>,
    clients: Arc<Clients>,
    notifications: Arc<Notifications>,
    registration: Arc<Registration>,
}

impl World {
    fn new() -> Self {
        let clients = Arc::new(Clients::new());
        let origin = WorkerConfig::default().origin;
        Self {
            fetcher: Arc::new(ScriptedFetcher::new()),
            store: Arc::new(MemoryCacheStore::new()),
            registration: Arc::new(Registration::new(origin, clients.clone())),
            clients,
            notifications: Arc::new(Notifications::new()),
        }
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            clients: self.clients.clone(),
            notifications: self.notifications.clone(),
            updates: self.registration.updates(),
        }
    }

    fn worker(&self, version: &str, skip_waiting: bool) -> Arc<ServiceWorker> {
        let config = WorkerConfig {
            cache_version: version.to_string(),
            skip_waiting_on_install: skip_waiting,
            ..WorkerConfig::default()
        };
        for path in &config.precache_manifest {
            self.fetcher.ok(&config.resolve(path).unwrap(), &format!("{version} {path}"));
        }
        Arc::new(ServiceWorker::new(Arc::new(config), self.context()))
    }

    async fn activate(&self, version: &str) -> Arc<ServiceWorker> {
        let worker = self.worker(version, true);
        let result = self.registration.install(worker.clone()).await.unwrap();
        assert_eq!(result, InstallResult::Activated);
        worker
    }

    async fn push(&self, body: &str) -> soc_sw::PushOutcome {
        let raw = bytes::Bytes::from(body.to_string());
        match self
            .registration
            .dispatch(WorkerEvent::Push(Some(raw)))
            .await
            .unwrap()
        {
            EventOutcome::Push(outcome) => outcome,
            other => panic!("expected push outcome, got {other:?}"),
        }
    }
}

fn url(path: &str) -> url::Url {
    WorkerConfig::default().resolve(path).unwrap()
}

#[tokio::test]
async fn install_precaches_every_manifest_asset() {
    let world = World::new();
    let worker = world.activate("v1").await;

    let cache = worker.config().cache_name();
    assert_eq!(
        world.store.entry_count(&cache).await.unwrap(),
        worker.config().precache_manifest.len()
    );
    for path in &worker.config().precache_manifest {
        let key = soc_sw::RequestKey::get(&url(path));
        assert!(
            world.store.match_request(&cache, &key).await.unwrap().is_some(),
            "{path} missing from {cache}"
        );
    }
}

#[tokio::test]
async fn activation_purges_stale_caches() {
    let world = World::new();
    world.store.open("soc-de-poble-v0").await.unwrap();
    world.store.open("somebody-else").await.unwrap();

    world.activate("v1").await;

    assert_eq!(
        world.store.keys().await.unwrap(),
        vec!["soc-de-poble-v1".to_string()]
    );
}

#[tokio::test]
async fn install_failure_leaves_no_cache() {
    let world = World::new();
    let worker = world.worker("v1", true);
    world.fetcher.fail(&url("/manifest.json"));

    assert!(world.registration.install(worker.clone()).await.is_err());

    assert_eq!(worker.state(), ServiceWorkerState::Redundant);
    assert!(world.store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_navigation_serves_the_shell() {
    let world = World::new();
    world.activate("v1").await;
    world.fetcher.go_offline();

    let outcome = world
        .registration
        .dispatch(WorkerEvent::Fetch(Request::navigate(url("/chats/42"))))
        .await
        .unwrap();

    let EventOutcome::Fetch(outcome) = outcome else {
        panic!("expected fetch outcome");
    };
    assert_eq!(outcome.source(), Some(ResponseSource::Shell));
    assert_eq!(
        outcome.response().unwrap().body.as_ref(),
        b"v1 /index.html".as_slice()
    );
}

#[tokio::test]
async fn offline_asset_without_cache_gets_offline_response() {
    let world = World::new();
    world.activate("v1").await;
    world.fetcher.go_offline();

    let outcome = world
        .registration
        .dispatch(WorkerEvent::Fetch(Request::get(url("/assets/feed.js"))))
        .await
        .unwrap();

    let EventOutcome::Fetch(outcome) = outcome else {
        panic!("expected fetch outcome");
    };
    assert_eq!(outcome.source(), Some(ResponseSource::Offline));
    assert_eq!(outcome.response().unwrap().status, http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn repair_push_wipes_caches_and_is_idempotent() {
    let world = World::new();
    world.activate("v1").await;
    let repair = r#"{"type":"system-repair","title":"Actualització","body":"Reparant"}"#;

    let first = world.push(repair).await;
    assert!(world.store.keys().await.unwrap().is_empty());
    assert!(first.descriptor.title.starts_with(REPAIR_INDICATOR));
    assert!(first.update_requested);
    assert_eq!(first.purge.unwrap().deleted, vec!["soc-de-poble-v1".to_string()]);

    let second = world.push(repair).await;
    assert!(second.purge.unwrap().deleted.is_empty());
    assert_eq!(world.registration.update_checks(), 2);

    // Same tag: the second notification replaced the first.
    assert_eq!(world.notifications.displayed().await.len(), 1);
}

#[tokio::test]
async fn persona_click_opens_chat_with_context() {
    let world = World::new();
    world.activate("v1").await;

    let push = world.push(r#"{"body":"Hola!","data":{"isIAIA":true}}"#).await;
    let click = NotificationClickEvent {
        notification: push.notification,
        descriptor: push.descriptor,
        action: None,
    };

    let resolution = world
        .registration
        .dispatch(WorkerEvent::NotificationClick(click))
        .await
        .unwrap();

    let EventOutcome::Click(ClickResolution::Opened { url: opened, .. }) = resolution else {
        panic!("expected a new window, got {resolution:?}");
    };
    assert_eq!(opened.path(), "/chats");
    assert_eq!(opened.query(), Some("iaia_context=Hola%21"));
    assert!(world.notifications.displayed().await.is_empty());
}

#[tokio::test]
async fn click_reuses_an_open_window() {
    let world = World::new();
    world.activate("v1").await;
    let existing = Client::window(url("/feed"));
    let existing_id = existing.id.clone();
    world.clients.add(existing).await;

    let push = world.push(r#"{"title":"Mercat","data":{"url":"/market"}}"#).await;
    let resolution = world
        .registration
        .dispatch(WorkerEvent::NotificationClick(NotificationClickEvent {
            notification: push.notification,
            descriptor: push.descriptor,
            action: None,
        }))
        .await
        .unwrap();

    let EventOutcome::Click(resolution) = resolution else {
        panic!("expected click outcome");
    };
    assert_eq!(resolution.client_id(), Some(existing_id.as_str()));
    assert_eq!(world.clients.len().await, 1);
    assert_eq!(world.clients.get(&existing_id).await.unwrap().url, url("/market"));
}

#[tokio::test]
async fn waiting_update_is_applied_through_the_bridge() {
    let world = World::new();
    let v1 = world.activate("v1").await;

    let bridge = Arc::new(UpdateBridge::new(world.registration.clone(), world.store.clone()));
    let mut prompt = bridge.watch();
    let task = bridge.spawn();

    let v2 = world.worker("v2", false);
    let result = world.registration.install(v2.clone()).await.unwrap();
    assert!(matches!(result, InstallResult::Waiting(_)));

    prompt
        .wait_for(|p| p.is_visible())
        .await
        .expect("bridge dropped");
    assert_eq!(
        bridge.prompt(),
        UpdatePrompt::Visible {
            version: "v2".into()
        }
    );

    assert!(bridge.apply_update().await.unwrap());
    assert!(!bridge.apply_update().await.unwrap());

    assert!(v2.is_active());
    assert_eq!(v1.state(), ServiceWorkerState::Redundant);
    assert_eq!(
        world.store.keys().await.unwrap(),
        vec!["soc-de-poble-v2".to_string()]
    );
    assert_eq!(bridge.prompt(), UpdatePrompt::Hidden);

    task.abort();
}
