/// Chat-network access through a protocol bridge.
///
/// The bridge process speaks the real chat protocol; this client drives it
/// over JSON frames: one WebSocket per connection, outbound command frames,
/// inbound `TransportEvent` frames, plus an HTTP endpoint for the protocol
/// version probe.
use crate::error::TransportError;
use crate::transport::{
    ChatTransport, ConnectOptions, DisconnectCause, MessageKey, ProtocolVersion, TransportEvent,
    TransportLink,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum GatewayCommand<'a> {
    Init { options: &'a ConnectOptions },
    SendText {
        key: &'a MessageKey,
        to: &'a str,
        body: &'a str,
    },
    MarkRead { key: &'a MessageKey },
    Close { reason: &'a str },
}

/// Transport implementation backed by a gateway bridge.
pub struct GatewayTransport {
    ws_base: String,
    http_base: String,
    http: reqwest::Client,
}

impl GatewayTransport {
    /// Accepts a `ws://`, `wss://`, `http://`, or `https://` base URL and
    /// derives both endpoints from it.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| TransportError::Connect(format!("invalid gateway url: {err}")))?;
        let rest = base_url
            .split_once("://")
            .map(|(_, rest)| rest.trim_end_matches('/'))
            .unwrap_or_default();

        let (ws_scheme, http_scheme) = match parsed.scheme() {
            "ws" | "http" => ("ws", "http"),
            "wss" | "https" => ("wss", "https"),
            other => {
                return Err(TransportError::Connect(format!(
                    "unsupported gateway url scheme: {other}"
                )))
            }
        };

        Ok(Self {
            ws_base: format!("{ws_scheme}://{rest}"),
            http_base: format!("{http_scheme}://{rest}"),
            http: reqwest::Client::new(),
        })
    }

    pub fn version_url(&self) -> String {
        format!("{}/version", self.http_base)
    }

    pub fn connect_url(&self) -> String {
        format!("{}/connect", self.ws_base)
    }
}

#[async_trait]
impl ChatTransport for GatewayTransport {
    async fn fetch_version(&self) -> Result<ProtocolVersion, TransportError> {
        let response = self
            .http
            .get(self.version_url())
            .send()
            .await
            .map_err(|err| TransportError::Version(err.to_string()))?
            .error_for_status()
            .map_err(|err| TransportError::Version(err.to_string()))?;

        response
            .json::<ProtocolVersion>()
            .await
            .map_err(|err| TransportError::Version(err.to_string()))
    }

    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        let (ws_stream, _) = connect_async(self.connect_url())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Outbound pump: commands become text frames until the socket rejects one.
        tokio::spawn(async move {
            while let Some(msg) = command_rx.recv().await {
                if let Err(err) = write.send(msg).await {
                    log::error!("gateway write failed: {err}");
                    break;
                }
            }
        });

        // Inbound pump: decode event frames; a missing `closed` frame on
        // socket teardown is reported as a lost connection.
        tokio::spawn(async move {
            let mut saw_closed = false;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<TransportEvent>(&text) {
                            Ok(event) => {
                                let is_closed = matches!(event, TransportEvent::Closed { .. });
                                if event_tx.send(event).is_err() {
                                    return;
                                }
                                if is_closed {
                                    saw_closed = true;
                                    break;
                                }
                            }
                            Err(err) => {
                                log::warn!("skipping undecodable gateway frame: {err}");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("gateway read failed: {err}");
                        break;
                    }
                }
            }
            if !saw_closed {
                let _ = event_tx.send(TransportEvent::Closed {
                    cause: DisconnectCause::ConnectionLost {
                        detail: "gateway socket ended".to_string(),
                    },
                });
            }
        });

        let link = GatewayLink {
            commands: command_tx,
            events: event_rx,
        };
        link.send_command(&GatewayCommand::Init { options: &options })?;

        Ok(Box::new(link))
    }
}

struct GatewayLink {
    commands: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl GatewayLink {
    fn send_command(&self, command: &GatewayCommand<'_>) -> Result<(), TransportError> {
        let json = serde_json::to_string(command)
            .map_err(|err| TransportError::Send(err.to_string()))?;
        self.commands
            .send(Message::Text(json.into()))
            .map_err(|_| TransportError::LinkClosed)
    }
}

#[async_trait]
impl TransportLink for GatewayLink {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn send_text(&mut self, to: &str, body: &str) -> Result<MessageKey, TransportError> {
        let key = MessageKey {
            id: Uuid::new_v4().to_string(),
            from_me: true,
            remote: to.to_string(),
        };
        self.send_command(&GatewayCommand::SendText {
            key: &key,
            to,
            body,
        })?;
        Ok(key)
    }

    async fn mark_read(&mut self, key: &MessageKey) -> Result<(), TransportError> {
        self.send_command(&GatewayCommand::MarkRead { key })
    }

    async fn shutdown(&mut self, reason: &str) -> Result<(), TransportError> {
        self.send_command(&GatewayCommand::Close { reason })
    }
}
