/// Transport seam between sessions and the chat network.
/// Implementations speak the actual protocol (see `gateway`); sessions only
/// consume the typed events and operations defined here.

pub mod gateway;
#[cfg(any(test, feature = "test_utils"))]
pub mod mock;

use crate::credentials::{KeyMaterial, KeyMaterialUpdate};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Chat-network addresses are plain strings ("jids").
pub type Jid = String;

/// Protocol version advertised by the chat network: [major, minor, patch].
pub type ProtocolVersion = [u16; 3];

pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";
const GROUP_JID_SUFFIX: &str = "@g.us";
const BROADCAST_JID_SUFFIX: &str = "@broadcast";
const NEWSLETTER_JID_SUFFIX: &str = "@newsletter";
const STATUS_JID: &str = "status@broadcast";

/// Close reason used when the owner terminates a session on purpose.
/// Any other reason is treated like a transport drop and reconnects.
pub const OWNER_CLOSE_REASON: &str = "session.close()";

pub fn is_user_jid(jid: &str) -> bool {
    jid.ends_with(USER_JID_SUFFIX)
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(GROUP_JID_SUFFIX)
}

pub fn is_broadcast_jid(jid: &str) -> bool {
    jid.ends_with(BROADCAST_JID_SUFFIX)
}

pub fn is_status_jid(jid: &str) -> bool {
    jid == STATUS_JID
}

pub fn is_newsletter_jid(jid: &str) -> bool {
    jid.ends_with(NEWSLETTER_JID_SUFFIX)
}

/// Derive a user jid from a local phone number: a leading `0` becomes the
/// `972` country prefix, dashes are dropped.
pub fn jid_from_phone(phone: &str) -> Jid {
    let digits = phone.replace('-', "");
    let international = match digits.strip_prefix('0') {
        Some(rest) => format!("972{rest}"),
        None => digits,
    };
    format!("{international}{USER_JID_SUFFIX}")
}

/// Which chats a connection should receive events for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerFilter {
    #[serde(rename = "operatorJid")]
    pub operator_jid: Jid,
    #[serde(rename = "selfJid")]
    pub self_jid: Jid,
    /// Login-only sessions keep user chats open so pairing completes quickly;
    /// they never run a conversation.
    #[serde(rename = "loginOnly")]
    pub login_only: bool,
}

impl PeerFilter {
    /// Group, broadcast, status, and newsletter chats are always ignored.
    /// User chats other than the operator bot and the user's own self-chat
    /// are ignored unless the session is login-only.
    pub fn ignores(&self, jid: &str) -> bool {
        (!self.login_only
            && is_user_jid(jid)
            && jid != self.operator_jid
            && jid != self.self_jid)
            || is_broadcast_jid(jid)
            || is_group_jid(jid)
            || is_status_jid(jid)
            || is_newsletter_jid(jid)
    }
}

/// Identifies one message within a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: String,
    #[serde(rename = "fromMe")]
    pub from_me: bool,
    pub remote: Jid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRow {
    pub title: String,
    pub description: String,
}

/// Remote-side notification kinds the engine knows how to ignore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubKind {
    BusinessPrivacyModeToFb,
    E2eEncrypted,
    Other(u32),
}

/// The semi-structured shapes inbound bot replies arrive in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    Image { caption: Option<String> },
    Buttons { text: String, buttons: Vec<String> },
    List {
        title: String,
        description: String,
        button: String,
        rows: Vec<ListRow>,
    },
    Notification { stub: StubKind },
    Unknown,
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { body } => Some(body),
            _ => None,
        }
    }
}

/// One inbound message, as surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub key: MessageKey,
    /// Epoch seconds.
    pub timestamp: i64,
    /// True when the message was replayed from history rather than received
    /// live (backlog replay happens on reconnect).
    #[serde(rename = "fromBacklog", default)]
    pub from_backlog: bool,
    pub content: MessageContent,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectCause {
    /// The remote side invalidated this device's credentials.
    LoggedOut,
    /// The local side asked the link to close, with the reason it gave.
    Requested { reason: String },
    ConnectionLost { detail: String },
}

/// Events a connection surfaces to its session, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    PairingCode { code: String },
    /// The connection is authenticated with the chat network.
    Authenticated,
    /// History/notification sync finished; the session is usable.
    Ready,
    CredentialUpdate { update: KeyMaterialUpdate },
    Message { message: MessageEvent },
    Closed { cause: DisconnectCause },
}

/// Everything a connection attempt needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub version: ProtocolVersion,
    pub material: KeyMaterial,
    pub filter: PeerFilter,
}

/// A live connection: an ordered event stream plus its control operations.
#[async_trait]
pub trait TransportLink: Send {
    /// Next transport event; `None` once the link is torn down after `Closed`.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Send a plain text message. Delivery is fire-and-forget at the protocol
    /// level; the returned key identifies the sent message locally.
    async fn send_text(&mut self, to: &str, body: &str) -> Result<MessageKey, TransportError>;

    /// Mark an inbound message as read.
    async fn mark_read(&mut self, key: &MessageKey) -> Result<(), TransportError>;

    /// Ask the link to close. A `Closed(Requested(reason))` event follows on
    /// the event stream.
    async fn shutdown(&mut self, reason: &str) -> Result<(), TransportError>;
}

/// Factory for connections to the chat network.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_version(&self) -> Result<ProtocolVersion, TransportError>;

    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn TransportLink>, TransportError>;
}
