/// Pairing relay: per-user event channel between a running session and
/// the browser page waiting to show pairing codes.
///
/// At most one relay connection may exist per user. The session side
/// fires events without caring whether a browser is attached; `emit` is
/// a no-op when no relay is open. Closing a relay runs its abort hook
/// exactly once, which is how a browser disconnect tears down the
/// session it was pairing.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::RelayError;

/// Events forwarded to an attached browser.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A fresh pairing code to render.
    Qr(String),
    /// The peer accepted the pairing; the page can stop polling.
    Authenticated,
    /// Something went wrong worth surfacing to the page.
    Error(String),
}

impl RelayEvent {
    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Qr(_) => "qr",
            RelayEvent::Authenticated => "authenticated",
            RelayEvent::Error(_) => "error",
        }
    }
}

/// Hook run exactly once when the relay connection goes away.
pub type AbortHook = Box<dyn FnOnce() + Send + 'static>;

struct RelayEntry {
    sender: mpsc::UnboundedSender<RelayEvent>,
    abort_hook: Option<AbortHook>,
    opened_at: Instant,
}

/// Uptime listing entry for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct RelayConnectionInfo {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub uptime: String,
}

/// Registry of open relay connections, keyed by user id.
pub struct PairingRelay {
    connections: Mutex<HashMap<String, RelayEntry>>,
}

impl PairingRelay {
    pub fn new() -> Self {
        PairingRelay {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Open a relay for a user, returning the receiving side of the
    /// event channel. Fails if one is already open for that user.
    pub fn open(&self, user_id: &str) -> Result<mpsc::UnboundedReceiver<RelayEvent>, RelayError> {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if connections.contains_key(user_id) {
            return Err(RelayError::AlreadyActive(user_id.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        connections.insert(
            user_id.to_string(),
            RelayEntry {
                sender,
                abort_hook: None,
                opened_at: Instant::now(),
            },
        );

        log::info!("relay opened for user {}", user_id);
        Ok(receiver)
    }

    pub fn exists(&self, user_id: &str) -> bool {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.contains_key(user_id)
    }

    /// Forward an event to the attached browser. Silently does nothing
    /// when no relay is open for the user.
    pub fn emit(&self, user_id: &str, event: RelayEvent) {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = connections.get(user_id) {
            let _ = entry.sender.send(event);
        }
    }

    /// Install the hook that tears down whatever the relay was serving.
    /// Ignored when no relay is open.
    pub fn set_abort_hook(&self, user_id: &str, hook: AbortHook) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        match connections.get_mut(user_id) {
            Some(entry) => entry.abort_hook = Some(hook),
            None => log::debug!("no relay for user {}, dropping abort hook", user_id),
        }
    }

    pub fn has_abort_hook(&self, user_id: &str) -> bool {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections
            .get(user_id)
            .is_some_and(|entry| entry.abort_hook.is_some())
    }

    /// Close the relay for a user. Runs the abort hook exactly once and
    /// drops the event channel. Returns false when nothing was open,
    /// so repeated closes are harmless.
    pub fn close(&self, user_id: &str) -> bool {
        let entry = {
            let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            connections.remove(user_id)
        };

        let Some(entry) = entry else {
            return false;
        };

        if let Some(hook) = entry.abort_hook {
            hook();
        }
        log::info!("relay closed for user {}", user_id);
        true
    }

    /// Snapshot of open relay connections and how long each has been up.
    pub fn active_connections(&self) -> Vec<RelayConnectionInfo> {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let mut listing: Vec<RelayConnectionInfo> = connections
            .iter()
            .map(|(user_id, entry)| RelayConnectionInfo {
                user_id: user_id.clone(),
                uptime: format_elapsed(entry.opened_at.elapsed()),
            })
            .collect();
        listing.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        listing
    }
}

impl Default for PairingRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a duration as "0d 0h 1m 5s".
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}
