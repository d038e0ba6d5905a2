/// Scripted transport for tests.
///
/// Every `connect` call hands the test a `LinkProbe`: the captured connect
/// options, a sender for injecting transport events, and a receiver observing
/// the commands the session issues on that link.
use crate::error::TransportError;
use crate::transport::{
    ChatTransport, ConnectOptions, DisconnectCause, Jid, ListRow, MessageContent, MessageEvent,
    MessageKey, ProtocolVersion, StubKind, TransportEvent, TransportLink,
};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const MOCK_VERSION: ProtocolVersion = [2, 3000, 1026];

/// A command the session issued on a mock link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    Text { to: Jid, body: String },
    Read(MessageKey),
    Shutdown(String),
}

/// Test-side handle to one accepted connection.
pub struct LinkProbe {
    pub options: ConnectOptions,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<LinkCommand>,
}

impl LinkProbe {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).expect("link was dropped by the session");
    }

    /// Inject a live text message from the given counterpart.
    pub fn emit_text(&self, from: &str, body: &str) {
        self.emit(TransportEvent::Message {
            message: text_message(from, body),
        });
    }

    pub fn emit_message(&self, message: MessageEvent) {
        self.emit(TransportEvent::Message { message });
    }

    pub fn emit_closed(&self, cause: DisconnectCause) {
        self.emit(TransportEvent::Closed { cause });
    }

    pub async fn next_command(&mut self) -> LinkCommand {
        self.outbound
            .recv()
            .await
            .expect("link closed without issuing a command")
    }

    /// Wait for the next outbound text, skipping read receipts.
    pub async fn next_text(&mut self) -> (Jid, String) {
        loop {
            match self.next_command().await {
                LinkCommand::Text { to, body } => return (to, body),
                LinkCommand::Read(_) => {}
                other => panic!("expected a text command, got {other:?}"),
            }
        }
    }
}

/// Build a live inbound message event with the given content.
pub fn message_from(from: &str, content: MessageContent) -> MessageEvent {
    MessageEvent {
        key: MessageKey {
            id: Uuid::new_v4().to_string(),
            from_me: false,
            remote: from.to_string(),
        },
        timestamp: chrono::Utc::now().timestamp(),
        from_backlog: false,
        content,
    }
}

/// Build a live inbound text message event.
pub fn text_message(from: &str, body: &str) -> MessageEvent {
    message_from(
        from,
        MessageContent::Text {
            body: body.to_string(),
        },
    )
}

/// Build an inbound list-menu message; rows are (title, description) pairs.
pub fn list_message(from: &str, title: &str, rows: &[(&str, &str)]) -> MessageEvent {
    message_from(
        from,
        MessageContent::List {
            title: title.to_string(),
            description: String::new(),
            button: "בחר".to_string(),
            rows: rows
                .iter()
                .map(|(title, description)| ListRow {
                    title: title.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        },
    )
}

/// Build an inbound button-menu message.
pub fn buttons_message(from: &str, text: &str, buttons: &[&str]) -> MessageEvent {
    message_from(
        from,
        MessageContent::Buttons {
            text: text.to_string(),
            buttons: buttons.iter().map(|label| label.to_string()).collect(),
        },
    )
}

/// Build an inbound image message.
pub fn image_message(from: &str, caption: Option<&str>) -> MessageEvent {
    message_from(
        from,
        MessageContent::Image {
            caption: caption.map(str::to_string),
        },
    )
}

/// Build an inbound protocol notification.
pub fn notification_message(from: &str, stub: StubKind) -> MessageEvent {
    message_from(from, MessageContent::Notification { stub })
}

/// Transport whose connections are driven by the test through `MockControl`.
pub struct MockTransport {
    probes: Mutex<mpsc::UnboundedSender<LinkProbe>>,
}

pub struct MockControl {
    probes: mpsc::UnboundedReceiver<LinkProbe>,
}

impl MockControl {
    /// The probe for the next accepted connection, in connect order.
    pub async fn next_link(&mut self) -> LinkProbe {
        self.probes
            .recv()
            .await
            .expect("transport was dropped before a connection arrived")
    }
}

impl MockTransport {
    pub fn new() -> (Self, MockControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                probes: Mutex::new(tx),
            },
            MockControl { probes: rx },
        )
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn fetch_version(&self) -> Result<ProtocolVersion, TransportError> {
        Ok(MOCK_VERSION)
    }

    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let probe = LinkProbe {
            options,
            events: event_tx.clone(),
            outbound: command_rx,
        };
        self.probes
            .lock()
            .expect("probe sender lock poisoned")
            .send(probe)
            .map_err(|_| TransportError::Connect("mock control dropped".to_string()))?;

        Ok(Box::new(MockLink {
            events: event_rx,
            loopback: event_tx,
            commands: command_tx,
        }))
    }
}

struct MockLink {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    loopback: mpsc::UnboundedSender<TransportEvent>,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

#[async_trait]
impl TransportLink for MockLink {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn send_text(&mut self, to: &str, body: &str) -> Result<MessageKey, TransportError> {
        self.commands
            .send(LinkCommand::Text {
                to: to.to_string(),
                body: body.to_string(),
            })
            .map_err(|_| TransportError::LinkClosed)?;
        Ok(MessageKey {
            id: Uuid::new_v4().to_string(),
            from_me: true,
            remote: to.to_string(),
        })
    }

    async fn mark_read(&mut self, key: &MessageKey) -> Result<(), TransportError> {
        self.commands
            .send(LinkCommand::Read(key.clone()))
            .map_err(|_| TransportError::LinkClosed)
    }

    async fn shutdown(&mut self, reason: &str) -> Result<(), TransportError> {
        let _ = self.commands.send(LinkCommand::Shutdown(reason.to_string()));
        self.loopback
            .send(TransportEvent::Closed {
                cause: DisconnectCause::Requested {
                    reason: reason.to_string(),
                },
            })
            .map_err(|_| TransportError::LinkClosed)
    }
}
