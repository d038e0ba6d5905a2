/// Per-user chat session actor
///
/// A Session owns one transport connection on behalf of one user. It is
/// spawned as a tokio task and talks to its owner through two channels:
/// an ordered event stream going out, and a command channel coming in.
/// The actor reconnects on connection loss with exponential backoff and
/// stops only on logout or an owner-requested close carrying the
/// sentinel reason.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::credentials::CredentialStore;
use crate::error::SessionError;
use crate::models::User;
use crate::relay::{PairingRelay, RelayEvent};
use crate::transport::{
    jid_from_phone, ChatTransport, ConnectOptions, DisconnectCause, Jid, MessageEvent, MessageKey,
    PeerFilter, ProtocolVersion, TransportEvent, TransportLink, OWNER_CLOSE_REASON,
};

pub mod registry;

use registry::ConnectionRegistry;

/// First reconnect delay after a dropped connection.
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(32);
/// Backlog-replayed messages older than this (relative to the connect
/// attempt) are dropped.
const BACKLOG_GRACE_SECS: i64 = 30;

/// Events a session reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A pairing code the user must scan.
    Qr(String),
    /// The connection is fully established and synced.
    Open,
    /// An inbound message from the operator bot.
    Message(MessageEvent),
    /// A credential update has been persisted.
    Saved,
    /// A non-fatal failure the owner may want to surface.
    Error(String),
    /// The session stopped and will not reconnect.
    Closed,
}

/// Commands accepted by the session actor.
pub enum SessionCommand {
    SendText {
        body: String,
        reply: oneshot::Sender<Result<MessageKey, SessionError>>,
    },
    MarkRead {
        key: MessageKey,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// `None` closes with the owner sentinel reason (terminal); a custom
    /// reason is forwarded to the transport and triggers reconnection.
    Close { reason: Option<String> },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub operator_jid: Jid,
    /// Login sessions skip the strict peer filtering used for routines.
    pub login_only: bool,
}

/// Shared collaborators a session needs; cheap to clone per spawn.
#[derive(Clone)]
pub struct SessionDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub relay: Arc<PairingRelay>,
    pub store: CredentialStore,
    pub transport: Arc<dyn ChatTransport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    QrPending,
    Open,
    Closed,
}

/// Owner-side handle to a running session.
#[derive(Debug)]
pub struct Session {
    user_id: String,
    session_id: Uuid,
    registry: Arc<ConnectionRegistry>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl Session {
    /// Claim the user slot, fetch the protocol version, and start the
    /// actor task. Fails fast with `AlreadyActive` when another session
    /// holds the slot.
    pub async fn spawn(
        user: User,
        options: SessionOptions,
        deps: SessionDeps,
    ) -> Result<(Session, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let session_id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        deps.registry
            .try_acquire(&user.user_id, session_id, command_tx.clone())?;

        let version = match deps.transport.fetch_version().await {
            Ok(version) => version,
            Err(err) => {
                deps.registry.release(&user.user_id, session_id);
                return Err(err.into());
            }
        };

        log::info!(
            "starting session {} for user {} (protocol {}.{}.{})",
            session_id,
            user.user_id,
            version[0],
            version[1],
            version[2]
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = Session {
            user_id: user.user_id.clone(),
            session_id,
            registry: deps.registry.clone(),
            commands: command_tx.clone(),
        };

        let actor = SessionActor {
            self_jid: jid_from_phone(&user.phone_number),
            user,
            session_id,
            version,
            operator_jid: options.operator_jid,
            login_only: options.login_only,
            registry: deps.registry,
            relay: deps.relay,
            store: deps.store,
            transport: deps.transport,
            commands: command_tx,
            command_rx,
            events: event_tx,
            state: SessionState::Connecting,
        };
        tokio::spawn(actor.run());

        Ok((handle, event_rx))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Send a text message to the operator bot.
    pub async fn send_text(&self, body: &str) -> Result<MessageKey, SessionError> {
        self.ensure_active()?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::SendText {
                body: body.to_string(),
                reply,
            })
            .map_err(|_| SessionError::NotActive(self.user_id.clone()))?;
        response
            .await
            .map_err(|_| SessionError::NotActive(self.user_id.clone()))?
    }

    /// Mark an inbound message as read.
    pub async fn mark_read(&self, key: &MessageKey) -> Result<(), SessionError> {
        self.ensure_active()?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::MarkRead {
                key: key.clone(),
                reply,
            })
            .map_err(|_| SessionError::NotActive(self.user_id.clone()))?;
        response
            .await
            .map_err(|_| SessionError::NotActive(self.user_id.clone()))?
    }

    /// Ask the actor to close the connection. `None` uses the owner
    /// sentinel reason and stops the session for good.
    pub fn close(&self, reason: Option<&str>) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.commands
            .send(SessionCommand::Close {
                reason: reason.map(str::to_string),
            })
            .map_err(|_| SessionError::NotActive(self.user_id.clone()))
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.registry.holds(&self.user_id, self.session_id) {
            Ok(())
        } else {
            Err(SessionError::NotActive(self.user_id.clone()))
        }
    }
}

struct SessionActor {
    user: User,
    session_id: Uuid,
    version: ProtocolVersion,
    operator_jid: Jid,
    self_jid: Jid,
    login_only: bool,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<PairingRelay>,
    store: CredentialStore,
    transport: Arc<dyn ChatTransport>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: SessionState,
}

impl SessionActor {
    async fn run(mut self) {
        let mut backoff = RECONNECT_INITIAL_DELAY;
        loop {
            // On reconnect the slot was released at close; take it back.
            if !self.registry.holds(&self.user.user_id, self.session_id) {
                if self
                    .registry
                    .try_acquire(&self.user.user_id, self.session_id, self.commands.clone())
                    .is_err()
                {
                    log::warn!(
                        "session {}: slot for user {} taken during reconnect, stopping",
                        self.session_id,
                        self.user.user_id
                    );
                    self.set_state(SessionState::Closed);
                    self.emit(SessionEvent::Closed);
                    return;
                }
            }
            self.set_state(SessionState::Connecting);

            let cause = match self.connect_and_pump(&mut backoff).await {
                Ok(cause) => cause,
                Err(err) => {
                    log::error!(
                        "session {}: connection attempt failed: {}",
                        self.session_id,
                        err
                    );
                    self.emit(SessionEvent::Error(err.to_string()));
                    self.registry.release(&self.user.user_id, self.session_id);
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            self.registry.release(&self.user.user_id, self.session_id);

            match cause {
                DisconnectCause::LoggedOut => {
                    log::info!(
                        "session {}: user {} logged out, clearing credentials",
                        self.session_id,
                        self.user.user_id
                    );
                    if let Err(err) = self.store.clear(&self.user.user_id).await {
                        log::error!(
                            "session {}: failed to clear credentials: {}",
                            self.session_id,
                            err
                        );
                    }
                    self.set_state(SessionState::Closed);
                    self.emit(SessionEvent::Closed);
                    return;
                }
                DisconnectCause::Requested { ref reason } if reason == OWNER_CLOSE_REASON => {
                    log::info!(
                        "session {}: closed by owner for user {}",
                        self.session_id,
                        self.user.user_id
                    );
                    self.set_state(SessionState::Closed);
                    self.emit(SessionEvent::Closed);
                    return;
                }
                cause => {
                    log::info!(
                        "session {}: connection closed ({:?}), reconnecting in {:?}",
                        self.session_id,
                        cause,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    /// One connect attempt: load credentials, open the link, then pump
    /// transport events and owner commands until the link closes.
    async fn connect_and_pump(
        &mut self,
        backoff: &mut Duration,
    ) -> Result<DisconnectCause, SessionError> {
        let material = self.store.load(&self.user.user_id).await?;
        let options = ConnectOptions {
            user_id: self.user.user_id.clone(),
            version: self.version,
            material,
            filter: PeerFilter {
                operator_jid: self.operator_jid.clone(),
                self_jid: self.self_jid.clone(),
                login_only: self.login_only,
            },
        };
        let mut link = self.transport.connect(options).await?;

        let attempt_started = Utc::now().timestamp();
        let mut sent_first_qr = false;
        let mut commands_open = true;

        loop {
            tokio::select! {
                event = link.next_event() => {
                    let Some(event) = event else {
                        return Ok(DisconnectCause::ConnectionLost {
                            detail: "transport stream ended".to_string(),
                        });
                    };
                    match event {
                        TransportEvent::PairingCode { code } => {
                            self.handle_pairing_code(&mut link, code, &mut sent_first_qr)
                                .await;
                        }
                        TransportEvent::Authenticated => {
                            self.relay
                                .emit(&self.user.user_id, RelayEvent::Authenticated);
                        }
                        TransportEvent::Ready => {
                            *backoff = RECONNECT_INITIAL_DELAY;
                            self.set_state(SessionState::Open);
                            self.emit(SessionEvent::Open);
                        }
                        TransportEvent::CredentialUpdate { update } => {
                            self.handle_credential_update(&update).await;
                        }
                        TransportEvent::Message { message } => {
                            self.handle_message(message, attempt_started);
                        }
                        TransportEvent::Closed { cause } => return Ok(cause),
                    }
                }
                command = self.command_rx.recv(), if commands_open => match command {
                    Some(SessionCommand::SendText { body, reply }) => {
                        let result = link
                            .send_text(&self.operator_jid, &body)
                            .await
                            .map_err(SessionError::from);
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::MarkRead { key, reply }) => {
                        let result = link.mark_read(&key).await.map_err(SessionError::from);
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::Close { reason }) => {
                        let reason = reason.unwrap_or_else(|| OWNER_CLOSE_REASON.to_string());
                        if let Err(err) = link.shutdown(&reason).await {
                            log::warn!(
                                "session {}: shutdown failed: {}",
                                self.session_id,
                                err
                            );
                            return Ok(DisconnectCause::Requested { reason });
                        }
                        // The close confirmation arrives as a Closed event.
                    }
                    None => {
                        commands_open = false;
                        if link.shutdown(OWNER_CLOSE_REASON).await.is_err() {
                            return Ok(DisconnectCause::Requested {
                                reason: OWNER_CLOSE_REASON.to_string(),
                            });
                        }
                    }
                },
            }
        }
    }

    async fn handle_pairing_code(
        &mut self,
        link: &mut Box<dyn TransportLink>,
        code: String,
        sent_first_qr: &mut bool,
    ) {
        self.set_state(SessionState::QrPending);
        self.emit(SessionEvent::Qr(code.clone()));

        if self.relay.exists(&self.user.user_id) {
            self.relay.emit(&self.user.user_id, RelayEvent::Qr(code));
            if !self.relay.has_abort_hook(&self.user.user_id) {
                // A browser dropping the relay mid-pairing must tear this
                // session down with it.
                let commands = self.commands.clone();
                self.relay.set_abort_hook(
                    &self.user.user_id,
                    Box::new(move || {
                        let _ = commands.send(SessionCommand::Close { reason: None });
                    }),
                );
            }
        } else if *sent_first_qr {
            log::warn!(
                "session {}: repeated pairing code for user {} with nobody watching, closing",
                self.session_id,
                self.user.user_id
            );
            self.emit(SessionEvent::Error(
                SessionError::PairingAbandoned.to_string(),
            ));
            if let Err(err) = link.shutdown(OWNER_CLOSE_REASON).await {
                log::warn!("session {}: shutdown failed: {}", self.session_id, err);
            }
        }

        *sent_first_qr = true;
    }

    async fn handle_credential_update(&mut self, update: &crate::credentials::KeyMaterialUpdate) {
        match self.store.save(&self.user.user_id, update).await {
            Ok(()) => {
                log::debug!(
                    "session {}: key material saved for user {}",
                    self.session_id,
                    self.user.user_id
                );
                self.emit(SessionEvent::Saved);
            }
            Err(err) => {
                log::error!(
                    "session {}: failed to save key material: {}",
                    self.session_id,
                    err
                );
                self.emit(SessionEvent::Error(format!(
                    "failed to save key material: {}",
                    err
                )));
            }
        }
    }

    fn handle_message(&mut self, message: MessageEvent, attempt_started: i64) {
        if !should_surface(&message, &self.operator_jid, attempt_started) {
            log::debug!(
                "session {}: dropping message {} from {}",
                self.session_id,
                message.key.id,
                message.key.remote
            );
            return;
        }
        self.emit(SessionEvent::Message(message));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!(
                "session {} for user {}: {:?} -> {:?}",
                self.session_id,
                self.user.user_id,
                self.state,
                state
            );
            self.state = state;
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_MAX_DELAY)
}

/// Inbound messages are surfaced only when they come from the operator
/// bot, are not our own echoes, and are not stale backlog replays.
fn should_surface(message: &MessageEvent, operator_jid: &str, attempt_started: i64) -> bool {
    if message.key.from_me {
        return false;
    }
    if message.key.remote != operator_jid {
        return false;
    }
    if message.from_backlog && message.timestamp < attempt_started - BACKLOG_GRACE_SECS {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MessageContent;

    fn message(from_me: bool, remote: &str, timestamp: i64, from_backlog: bool) -> MessageEvent {
        MessageEvent {
            key: MessageKey {
                id: "msg-1".to_string(),
                from_me,
                remote: remote.to_string(),
            },
            timestamp,
            from_backlog,
            content: MessageContent::Text {
                body: "hello".to_string(),
            },
        }
    }

    const OPERATOR: &str = "972500000001@s.whatsapp.net";

    #[test]
    fn test_should_surface_live_operator_message() {
        let now = Utc::now().timestamp();
        assert!(should_surface(&message(false, OPERATOR, now, false), OPERATOR, now));
    }

    #[test]
    fn test_should_drop_own_echo() {
        let now = Utc::now().timestamp();
        assert!(!should_surface(&message(true, OPERATOR, now, false), OPERATOR, now));
    }

    #[test]
    fn test_should_drop_foreign_sender() {
        let now = Utc::now().timestamp();
        let other = "972509999999@s.whatsapp.net";
        assert!(!should_surface(&message(false, other, now, false), OPERATOR, now));
    }

    #[test]
    fn test_should_drop_stale_backlog() {
        let now = Utc::now().timestamp();
        assert!(!should_surface(
            &message(false, OPERATOR, now - 45, true),
            OPERATOR,
            now
        ));
    }

    #[test]
    fn test_should_keep_recent_backlog() {
        let now = Utc::now().timestamp();
        assert!(should_surface(
            &message(false, OPERATOR, now - 10, true),
            OPERATOR,
            now
        ));
    }

    #[test]
    fn test_stale_timestamp_ok_when_not_backlog() {
        let now = Utc::now().timestamp();
        assert!(should_surface(
            &message(false, OPERATOR, now - 300, false),
            OPERATOR,
            now
        ));
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut delay = RECONNECT_INITIAL_DELAY;
        let mut observed = Vec::new();
        for _ in 0..7 {
            observed.push(delay.as_secs());
            delay = next_backoff(delay);
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 32, 32]);
    }
}
