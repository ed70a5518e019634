//! Push Handler.
//!
//! Wire format of a push body:
//!
//! ```json
//! { "type": "system-repair", "title": "...", "body": "...", "message": "...",
//!   "icon": "...", "badge": "...", "image": "...", "tag": "...",
//!   "data": { ... }, "actions": [{ "action": "...", "title": "..." }],
//!   "vibrate": [200, 100, 200] }
//! ```
//!
//! Every field is optional, and a field with the wrong type is dropped on its
//! own. Descriptor fields are merged in priority order: payload, then
//! defaults for the message kind, then the general defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::{purge_all, CacheStore, PurgeReport};
use crate::config::{NotificationConfig, WorkerConfig};
use crate::lifecycle::UpdateRequester;
use crate::notification::{
    MessageKind, NotificationAction, NotificationData, NotificationDescriptor, NotificationId,
    Notifications,
};

/// `type` value of the operator repair command.
pub const SYSTEM_REPAIR: &str = "system-repair";

/// Marker that repair notifications always carry in their title.
pub const REPAIR_INDICATOR: &str = "🔧";

/// Decoded push body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<NotificationAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrate: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_interaction: Option<bool>,
}

impl PushPayload {
    /// Decode a push body. Never fails.
    ///
    /// A missing or empty body gives the default payload; plain text becomes
    /// the body; a JSON object keeps every field that has the right type;
    /// anything else is logged and replaced by the default.
    pub fn parse(raw: Option<&[u8]>) -> Self {
        let Some(raw) = raw.filter(|r| !r.iter().all(u8::is_ascii_whitespace)) else {
            debug!("Push without payload");
            return Self::default();
        };

        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(fields)) => Self::from_fields(fields),
            Ok(other) => {
                warn!(kind = json_kind(&other), "Push payload is not an object, using defaults");
                Self::default()
            }
            Err(e) => match std::str::from_utf8(raw) {
                Ok(text) if !text.trim_start().starts_with(['{', '[']) => {
                    debug!("Push payload is plain text");
                    Self {
                        body: Some(text.trim().to_string()),
                        ..Self::default()
                    }
                }
                _ => {
                    warn!(error = %e, len = raw.len(), "Malformed push payload, using defaults");
                    Self::default()
                }
            },
        }
    }

    fn from_fields(mut fields: Map<String, Value>) -> Self {
        Self {
            kind: field(&mut fields, "type"),
            title: field(&mut fields, "title"),
            body: field(&mut fields, "body"),
            message: field(&mut fields, "message"),
            icon: field(&mut fields, "icon"),
            badge: field(&mut fields, "badge"),
            image: field(&mut fields, "image"),
            tag: field(&mut fields, "tag"),
            data: field(&mut fields, "data"),
            actions: field(&mut fields, "actions"),
            vibrate: field(&mut fields, "vibrate"),
            require_interaction: field(&mut fields, "requireInteraction"),
        }
    }

    /// Operator-issued cache repair command.
    pub fn is_repair(&self) -> bool {
        self.kind.as_deref() == Some(SYSTEM_REPAIR)
    }

    /// Message written by the IAIA persona.
    pub fn is_persona(&self) -> bool {
        matches!(self.kind.as_deref(), Some("iaia" | "iaia-message"))
            || self.data.as_ref().is_some_and(NotificationData::is_persona)
    }

    /// The explicit kind the descriptor will carry.
    pub fn message_kind(&self) -> MessageKind {
        if self.is_repair() {
            MessageKind::System
        } else if self.is_persona() {
            MessageKind::Persona
        } else {
            self.data.as_ref().map(|d| d.kind).unwrap_or_default()
        }
    }

    /// Merge over the configured defaults.
    pub fn into_descriptor(self, defaults: &NotificationConfig) -> NotificationDescriptor {
        let kind = self.message_kind();
        let repair = self.is_repair();
        let persona = kind == MessageKind::Persona;

        let title = match (self.title, repair) {
            (Some(t), true) if !t.starts_with(REPAIR_INDICATOR) => {
                format!("{REPAIR_INDICATOR} {t}")
            }
            (Some(t), _) => t,
            (None, true) => defaults.repair_title.clone(),
            (None, false) if persona => defaults.persona_title.clone(),
            (None, false) => defaults.default_title.clone(),
        };

        let body = self.body.or(self.message).unwrap_or_else(|| {
            if repair {
                defaults.repair_body.clone()
            } else {
                defaults.default_body.clone()
            }
        });

        let icon = self.icon.unwrap_or_else(|| {
            if persona {
                defaults.persona_icon.clone()
            } else {
                defaults.icon.clone()
            }
        });

        let tag = self.tag.unwrap_or_else(|| {
            if repair {
                defaults.repair_tag.clone()
            } else if persona {
                defaults.persona_tag.clone()
            } else {
                defaults.tag.clone()
            }
        });

        let vibrate = self.vibrate.unwrap_or_else(|| {
            if repair {
                defaults.repair_vibrate.clone()
            } else if persona {
                defaults.persona_vibrate.clone()
            } else {
                defaults.vibrate.clone()
            }
        });

        let actions = self.actions.unwrap_or_else(|| {
            if persona {
                vec![NotificationAction {
                    action: "open".to_string(),
                    title: "Obrir xat".to_string(),
                }]
            } else {
                Vec::new()
            }
        });

        let mut data = self.data.unwrap_or_default();
        data.kind = kind;
        data.repair |= repair;

        NotificationDescriptor {
            title,
            body,
            icon,
            badge: self.badge.unwrap_or_else(|| defaults.badge.clone()),
            image: self.image,
            tag,
            data,
            require_interaction: self.require_interaction.unwrap_or(repair || persona),
            actions,
            vibrate,
        }
    }
}

/// Take one field out of a push object. Null and badly typed values are
/// treated as absent.
fn field<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &'static str) -> Option<T> {
    match fields.remove(key)? {
        Value::Null => None,
        value => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(field = key, error = %e, "Ignoring badly typed push field");
                None
            }
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a push event did.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub notification: NotificationId,
    pub descriptor: NotificationDescriptor,
    /// Set when the repair path ran.
    pub purge: Option<PurgeReport>,
    /// The worker asked for its own update check.
    pub update_requested: bool,
}

/// Handle one push event.
///
/// The repair path deletes every cache and asks for an update check before
/// the notification is shown.
pub async fn handle_push(
    config: &WorkerConfig,
    store: &dyn CacheStore,
    notifications: &Notifications,
    updates: &dyn UpdateRequester,
    raw: Option<&[u8]>,
) -> PushOutcome {
    let payload = PushPayload::parse(raw);
    let repair = payload.is_repair();

    let purge = if repair {
        let report = purge_all(store).await;
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "System repair: caches purged"
        );
        updates.request_update().await;
        Some(report)
    } else {
        None
    };

    let descriptor = payload.into_descriptor(&config.notifications);
    let notification = notifications.show(descriptor.clone()).await;

    PushOutcome {
        notification,
        descriptor,
        purge,
        update_requested: repair,
    }
}
