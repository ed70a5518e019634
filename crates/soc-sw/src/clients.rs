//! Clients API: the windows (and workers) an origin has open.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{ServiceWorkerId, SwError};

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether the client supports in-place navigation.
    pub navigable: bool,

    /// Worker version controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// A top-level window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            navigable: true,
            controller: None,
        }
    }

    pub fn is_window(&self) -> bool {
        self.client_type == ClientType::Window
    }

    /// Whether `focus()` would succeed.
    pub fn is_focusable(&self) -> bool {
        self.is_window()
    }
}

/// Options for `Clients::match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Snapshot of the matching clients, ordered by id.
    pub async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Focus a window client; every other client loses focus.
    pub async fn focus(&self, id: &str) -> Result<Client, SwError> {
        let mut clients = self.clients.write().await;
        match clients.get(id) {
            None => return Err(SwError::NotFound(format!("client {id}"))),
            Some(c) if !c.is_focusable() => {
                return Err(SwError::State("Can only focus window clients".to_string()))
            }
            Some(_) => {}
        }
        for client in clients.values_mut() {
            client.focused = client.id == id;
        }
        clients
            .get(id)
            .cloned()
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))
    }

    /// Navigate a window client in place.
    pub async fn navigate(&self, id: &str, url: Url) -> Result<Client, SwError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(id)
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))?;
        if !client.is_window() || !client.navigable {
            return Err(SwError::State(
                "Client does not support navigation".to_string(),
            ));
        }
        debug!(client = %id, url = %url, "Navigating client");
        client.url = url;
        Ok(client.clone())
    }

    /// Open and focus a new window.
    pub async fn open_window(&self, url: Url) -> Result<Client, SwError> {
        let mut client = Client::window(url);
        client.focused = true;

        let mut clients = self.clients.write().await;
        for other in clients.values_mut() {
            other.focused = false;
        }
        clients.insert(client.id.clone(), client.clone());
        debug!(client = %client.id, url = %client.url, "Opened window");
        Ok(client)
    }

    /// Make `worker` the controller of every client. Returns how many changed.
    pub async fn claim(&self, worker: ServiceWorkerId) -> usize {
        let mut changed = 0;
        for client in self.clients.write().await.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                changed += 1;
            }
        }
        changed
    }

    /// Drop control by `worker` (used when it becomes redundant).
    pub async fn release(&self, worker: ServiceWorkerId) {
        for client in self.clients.write().await.values_mut() {
            if client.controller == Some(worker) {
                client.controller = None;
            }
        }
    }

    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://soc.example").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_open_window_is_focused() {
        let clients = Clients::new();
        let existing = Client::window(url("/feed"));
        clients.add(existing.clone()).await;

        let opened = clients.open_window(url("/chats")).await.unwrap();
        assert!(opened.focused);
        assert!(!clients.get(&existing.id).await.unwrap().focused);
    }

    #[tokio::test]
    async fn test_match_all_respects_controlled() {
        let clients = Clients::new();
        clients.add(Client::window(url("/"))).await;

        let controlled = clients.match_all(ClientMatchOptions::default()).await;
        assert!(controlled.is_empty());

        let all = clients
            .match_all(ClientMatchOptions {
                include_uncontrolled: true,
                ..Default::default()
            })
            .await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_claim() {
        let clients = Clients::new();
        clients.add(Client::window(url("/"))).await;
        clients.add(Client::window(url("/market"))).await;

        let worker = ServiceWorkerId::new();
        assert_eq!(clients.claim(worker).await, 2);
        assert_eq!(clients.claim(worker).await, 0);
        assert_eq!(clients.match_all(ClientMatchOptions::default()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_focus_rejects_workers() {
        let clients = Clients::new();
        let mut worker = Client::window(url("/worker.js"));
        worker.client_type = ClientType::Worker;
        clients.add(worker.clone()).await;

        assert!(matches!(
            clients.focus(&worker.id).await,
            Err(SwError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_navigate_requires_support() {
        let clients = Clients::new();
        let mut window = Client::window(url("/"));
        window.navigable = false;
        clients.add(window.clone()).await;

        assert!(clients.navigate(&window.id, url("/chats")).await.is_err());
    }
}
