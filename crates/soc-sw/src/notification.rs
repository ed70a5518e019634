//! Notification descriptors and the notification center.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

/// Who a message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A neighbour.
    #[default]
    Human,
    /// The IAIA assistant persona.
    Persona,
    /// The operators.
    System,
}

impl MessageKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "human" => Some(Self::Human),
            "persona" | "iaia" => Some(Self::Persona),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Context attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireData")]
pub struct NotificationData {
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "forceRefresh")]
    pub force_refresh: bool,
    pub repair: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotificationData {
    pub fn is_persona(&self) -> bool {
        self.kind == MessageKind::Persona
    }

    /// The click should bust caches on arrival.
    pub fn wants_refresh(&self) -> bool {
        self.force_refresh || self.repair
    }
}

/// Lenient view of the `data` object as senders produce it.
#[derive(Deserialize)]
struct WireData {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default, rename = "isIAIA")]
    is_iaia: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "forceRefresh")]
    force_refresh: Option<Value>,
    #[serde(default)]
    repair: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<WireData> for NotificationData {
    fn from(wire: WireData) -> Self {
        let kind = match wire.kind.as_deref().and_then(MessageKind::parse) {
            Some(kind) => kind,
            None if truthy(wire.is_iaia.as_ref()) => MessageKind::Persona,
            None => MessageKind::Human,
        };
        Self {
            kind,
            url: wire.url.filter(|u| !u.is_empty()),
            force_refresh: truthy(wire.force_refresh.as_ref()),
            repair: truthy(wire.repair.as_ref()),
            extra: wire.extra,
        }
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Everything needed to display a system notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub tag: String,
    #[serde(default)]
    pub data: NotificationData,
    #[serde(default)]
    pub require_interaction: bool,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub vibrate: Vec<u32>,
}

/// Identifier of a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A notification currently on screen.
#[derive(Debug, Clone)]
pub struct DisplayedNotification {
    pub id: NotificationId,
    pub descriptor: NotificationDescriptor,
}

/// Notifications shown by the worker.
///
/// A notification with the same tag as one already on screen replaces it.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: RwLock<Vec<DisplayedNotification>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn show(&self, descriptor: NotificationDescriptor) -> NotificationId {
        let id = NotificationId::new();
        let mut shown = self.shown.write().await;
        shown.retain(|n| n.descriptor.tag != descriptor.tag);
        debug!(?id, tag = %descriptor.tag, title = %descriptor.title, "Showing notification");
        shown.push(DisplayedNotification { id, descriptor });
        id
    }

    pub async fn get(&self, id: NotificationId) -> Option<NotificationDescriptor> {
        self.shown
            .read()
            .await
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.descriptor.clone())
    }

    pub async fn displayed(&self) -> Vec<DisplayedNotification> {
        self.shown.read().await.clone()
    }

    /// Dismiss a notification; `false` if it was not on screen.
    pub async fn close(&self, id: NotificationId) -> bool {
        let mut shown = self.shown.write().await;
        let before = shown.len();
        shown.retain(|n| n.id != id);
        shown.len() != before
    }
}
