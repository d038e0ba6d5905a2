/// Pairing relay stream handler (server-sent events)
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::{web, HttpResponse, Result as ActixResult};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::relay::{PairingRelay, RelayEvent};
use crate::service::AgentService;

#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
}

/// GET /sse?token=...
///
/// Redeems the single-use pairing token, opens the user's relay, and
/// streams its events until either side goes away.
pub async fn sse(
    service: web::Data<AgentService>,
    query: web::Query<SseQuery>,
) -> ActixResult<HttpResponse> {
    let Some(token) = query.token.as_deref() else {
        return Ok(HttpResponse::Unauthorized().body("Unauthorized"));
    };
    let Some(user_id) = service.tokens().redeem(token) else {
        return Ok(HttpResponse::Unauthorized().body("Unauthorized"));
    };

    let events = match service.relay().open(&user_id) {
        Ok(events) => events,
        Err(RelayError::AlreadyActive(_)) => {
            return Ok(HttpResponse::Conflict().json(json!({
                "error": "Relay already open for this user"
            })));
        }
    };

    log::info!("sse stream attached for user {}", user_id);
    let stream = SseStream {
        user_id,
        relay: service.relay().clone(),
        events,
    };
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}

/// Adapts the relay channel to an SSE body. Dropping the stream (the
/// browser navigated away) closes the relay, which fires its abort hook.
struct SseStream {
    user_id: String,
    relay: Arc<PairingRelay>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
}

impl Stream for SseStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(frame(&event)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        if self.relay.close(&self.user_id) {
            log::info!("sse stream detached for user {}", self.user_id);
        }
    }
}

/// One SSE frame: `event: {name}\n` then `data: {json}\n\n`.
fn frame(event: &RelayEvent) -> Bytes {
    let data = match event {
        RelayEvent::Qr(code) => json!(code),
        RelayEvent::Authenticated => json!("NODATA"),
        RelayEvent::Error(message) => json!(message),
    };
    Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data))
}
