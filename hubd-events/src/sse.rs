//! SSE transport: long-lived responses framing hub events as
//! `data: <json>\n\n`, with an initial `connected` frame and heartbeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::event::HubEvent;
use crate::hub::EventHub;

/// The client half of one registered connection.
pub struct SseClient {
    connection_id: String,
    receiver: broadcast::Receiver<HubEvent>,
    done: CancellationToken,
    dropped: Arc<AtomicU64>,
}

/// Deregisters the connection when the response stream is dropped, which
/// covers client disconnects, write errors and server shutdown alike.
struct ConnectionGuard {
    hub: Arc<EventHub>,
    user_name: String,
    connection_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let user = std::mem::take(&mut self.user_name);
        let connection = std::mem::take(&mut self.connection_id);
        tokio::spawn(async move {
            hub.remove_connection(&user, &connection).await;
        });
    }
}

impl SseClient {
    pub(crate) fn new(
        connection_id: String,
        receiver: broadcast::Receiver<HubEvent>,
        done: CancellationToken,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            connection_id,
            receiver,
            done,
            dropped,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Receive the next event; `None` once the connection is closed.
    /// Lagged (overflowed) entries are skipped and counted.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            tokio::select! {
                _ = self.done.cancelled() => return None,
                result = self.receiver.recv() => match result {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.dropped.fetch_add(n, Ordering::Relaxed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Build the SSE response. The `guard` ties the connection's registry
    /// entry to the response lifetime.
    pub fn into_response(
        self,
        hub: Arc<EventHub>,
        user_name: String,
    ) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
        let guard = ConnectionGuard {
            hub,
            user_name,
            connection_id: self.connection_id.clone(),
        };
        let connected = Event::default().event("connected").data(
            serde_json::json!({"connection_id": self.connection_id}).to_string(),
        );
        let stream = futures_util::stream::unfold(
            SseState {
                client: self,
                connected: Some(connected),
                _guard: guard,
            },
            |mut state| async move {
                if let Some(frame) = state.connected.take() {
                    return Some((Ok(frame), state));
                }
                let event = state.client.recv().await?;
                let frame = match serde_json::to_string(&event) {
                    Ok(json) => Event::default().data(json),
                    Err(e) => {
                        tracing::warn!(error = %e, "unserializable event dropped");
                        Event::default().comment("skipped")
                    }
                };
                Some((Ok(frame), state))
            },
        );
        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("heartbeat"),
        )
    }
}

struct SseState {
    client: SseClient,
    connected: Option<Event>,
    _guard: ConnectionGuard,
}
