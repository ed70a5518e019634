//! Notification-Click Router.
//!
//! Turns a clicked notification into exactly one focused window: an
//! existing window at the target, else any same-origin window (navigated
//! to the target), else a new one.

use tracing::{debug, warn};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::config::WorkerConfig;
use crate::notification::{NotificationDescriptor, NotificationId, Notifications};
use crate::SwError;

/// Query parameter carrying a persona message into the chat view.
pub const CONTEXT_PARAM: &str = "iaia_context";

/// Actions that only dismiss the notification.
const DISMISS_ACTIONS: [&str; 2] = ["close", "dismiss"];

/// A click on a displayed notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: NotificationId,
    pub descriptor: NotificationDescriptor,
    /// Action button pressed, if any.
    pub action: Option<String>,
}

/// Where the click ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickResolution {
    /// An existing window was focused.
    Focused { client_id: String, url: Url },
    /// An existing window was focused and navigated to the target.
    FocusedAndNavigated { client_id: String, url: Url },
    /// A new window was opened.
    Opened { client_id: String, url: Url },
    /// A dismiss action; nothing was opened.
    Dismissed,
}

impl ClickResolution {
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Focused { client_id, .. }
            | Self::FocusedAndNavigated { client_id, .. }
            | Self::Opened { client_id, .. } => Some(client_id),
            Self::Dismissed => None,
        }
    }
}

/// Root-relative target for a click, query string included.
pub fn resolve_target(descriptor: &NotificationDescriptor, config: &WorkerConfig, now_ms: u64) -> String {
    let data = &descriptor.data;
    let base = data
        .url
        .clone()
        .unwrap_or_else(|| config.notifications.default_route.clone());

    let mut params = Vec::new();
    if data.is_persona() {
        params.push(format!(
            "{CONTEXT_PARAM}={}",
            urlencoding::encode(&descriptor.body)
        ));
    }
    if data.wants_refresh() {
        params.push(format!("refresh_ts={now_ms}"));
        params.push("repair=active".to_string());
    }

    append_query(&base, &params)
}

fn append_query(target: &str, params: &[String]) -> String {
    if params.is_empty() {
        return target.to_string();
    }

    let (path, fragment) = match target.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (target, None),
    };
    let separator = if path.contains('?') { '&' } else { '?' };

    let mut out = format!("{path}{separator}{}", params.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Focus or open a window at `target`.
pub async fn route_click(clients: &Clients, target: Url) -> Result<ClickResolution, SwError> {
    let windows = clients
        .match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        })
        .await;

    if let Some(exact) = windows.iter().find(|c| c.url == target) {
        let client = clients.focus(&exact.id).await?;
        debug!(client = %client.id, url = %target, "Focused window already at target");
        return Ok(ClickResolution::Focused {
            client_id: client.id,
            url: target,
        });
    }

    if let Some(window) = windows
        .iter()
        .find(|c| c.url.origin() == target.origin() && c.is_focusable())
    {
        let client = clients.focus(&window.id).await?;
        if !client.navigable {
            return Ok(ClickResolution::Focused {
                client_id: client.id,
                url: client.url,
            });
        }
        return match clients.navigate(&client.id, target.clone()).await {
            Ok(client) => Ok(ClickResolution::FocusedAndNavigated {
                client_id: client.id,
                url: target,
            }),
            Err(e) => {
                warn!(client = %client.id, error = %e, "Navigation failed, window left focused");
                Ok(ClickResolution::Focused {
                    client_id: client.id,
                    url: client.url,
                })
            }
        };
    }

    let client = clients.open_window(target.clone()).await?;
    Ok(ClickResolution::Opened {
        client_id: client.id,
        url: target,
    })
}

/// Handle a click: close the notification, then route.
pub async fn handle_click(
    config: &WorkerConfig,
    clients: &Clients,
    notifications: &Notifications,
    event: NotificationClickEvent,
    now_ms: u64,
) -> Result<ClickResolution, SwError> {
    notifications.close(event.notification).await;

    if event
        .action
        .as_deref()
        .is_some_and(|a| DISMISS_ACTIONS.contains(&a))
    {
        return Ok(ClickResolution::Dismissed);
    }

    let target = resolve_target(&event.descriptor, config, now_ms);
    let url = config.resolve(&target)?;
    route_click(clients, url).await
}
