/// Single-session-per-user registry
///
/// Holds the command sender of the session currently owning each user
/// slot. Acquisition is first-wins; a second session for the same user
/// is rejected without disturbing the holder. Release is idempotent and
/// keyed by session id, so a stale release can never evict a successor.
use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionError;

use super::SessionCommand;

#[derive(Debug)]
struct ActiveSession {
    session_id: Uuid,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<String, ActiveSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the user slot for a session. Fails when any session
    /// already holds it.
    pub fn try_acquire(
        &self,
        user_id: &str,
        session_id: Uuid,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(user_id) {
            return Err(SessionError::AlreadyActive(user_id.to_string()));
        }
        sessions.insert(
            user_id.to_string(),
            ActiveSession {
                session_id,
                commands,
            },
        );
        Ok(())
    }

    /// Drop the slot, but only if this session still owns it.
    pub fn release(&self, user_id: &str, session_id: Uuid) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions
            .get(user_id)
            .is_some_and(|active| active.session_id == session_id)
        {
            sessions.remove(user_id);
        }
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(user_id)
    }

    /// Whether a specific session still owns the user slot.
    pub fn holds(&self, user_id: &str, session_id: Uuid) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(user_id)
            .is_some_and(|active| active.session_id == session_id)
    }

    /// Command sender of the session currently holding the user slot.
    pub fn lookup(&self, user_id: &str) -> Option<mpsc::UnboundedSender<SessionCommand>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(user_id).map(|active| active.commands.clone())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
