//! Per-user event channel registry.
//!
//! Every SSE connection owns one bounded broadcast channel (capacity 64
//! by default). Writes never block: on overflow the channel discards its
//! oldest entries and the reader's lag is counted into the drop metric.
//! The registry lock is never held across I/O; sends complete inside a
//! single read-lock scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubd_catalog::PgCatalog;
use hubd_core::HubResult;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::event::HubEvent;
use crate::sse::SseClient;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Optional persistence for events that found no live channel.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn persist_unread(&self, event: &HubEvent) -> HubResult<()>;
}

#[async_trait]
impl EventStore for PgCatalog {
    async fn persist_unread(&self, event: &HubEvent) -> HubResult<()> {
        self.insert_sse_event(
            &event.event_type,
            event.user_name.as_deref(),
            event.data.clone(),
            false,
        )
        .await?;
        Ok(())
    }
}

pub struct ClientHandle {
    pub connection_id: String,
    pub user_name: String,
    pub client_ip: Option<String>,
    pub opened_at: DateTime<Utc>,
    sender: broadcast::Sender<HubEvent>,
    done: CancellationToken,
}

impl ClientHandle {
    fn send(&self, event: HubEvent) -> bool {
        // A send only fails when the receiver is gone, i.e. the client
        // stream already dropped.
        self.sender.send(event).is_ok()
    }

    pub fn close(&self) {
        self.done.cancel();
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_name: String,
    pub client_ip: Option<String>,
    pub opened_at: DateTime<Utc>,
}

pub struct EventHub {
    capacity: usize,
    connections: RwLock<HashMap<String, Vec<Arc<ClientHandle>>>>,
    dropped: Arc<AtomicU64>,
    store: Option<Arc<dyn EventStore>>,
}

impl EventHub {
    pub fn new(capacity: usize, store: Option<Arc<dyn EventStore>>) -> Self {
        Self {
            capacity: capacity.max(1),
            connections: RwLock::new(HashMap::new()),
            dropped: Arc::new(AtomicU64::new(0)),
            store,
        }
    }

    /// Register a connection and hand back the client half the SSE
    /// transport consumes.
    pub async fn add_connection(
        &self,
        user_name: &str,
        connection_id: &str,
        client_ip: Option<String>,
    ) -> SseClient {
        let (sender, receiver) = broadcast::channel(self.capacity);
        let done = CancellationToken::new();
        let handle = Arc::new(ClientHandle {
            connection_id: connection_id.to_string(),
            user_name: user_name.to_string(),
            client_ip,
            opened_at: Utc::now(),
            sender,
            done: done.clone(),
        });
        self.connections
            .write()
            .await
            .entry(user_name.to_string())
            .or_default()
            .push(handle);
        tracing::debug!(user = user_name, connection = connection_id, "sse connection added");
        SseClient::new(
            connection_id.to_string(),
            receiver,
            done,
            self.dropped.clone(),
        )
    }

    /// Close the channel and deregister. Idempotent.
    pub async fn remove_connection(&self, user_name: &str, connection_id: &str) {
        let mut map = self.connections.write().await;
        if let Some(handles) = map.get_mut(user_name) {
            handles.retain(|h| {
                if h.connection_id == connection_id {
                    h.close();
                    false
                } else {
                    true
                }
            });
            if handles.is_empty() {
                map.remove(user_name);
            }
        }
        tracing::debug!(user = user_name, connection = connection_id, "sse connection removed");
    }

    /// Fan one event out to every channel registered for the user.
    /// Returns the number of channels that took it; with none, the event
    /// is persisted unread when a store is wired.
    pub async fn send_to_user(&self, user_name: &str, event: HubEvent) -> usize {
        let delivered = {
            let map = self.connections.read().await;
            match map.get(user_name) {
                Some(handles) => handles
                    .iter()
                    .filter(|handle| handle.send(event.clone()))
                    .count(),
                None => 0,
            }
        };
        if delivered == 0 {
            if let Some(store) = &self.store {
                if let Err(e) = store.persist_unread(&event).await {
                    tracing::warn!(error = %e, "failed to persist unread event");
                }
            }
        }
        delivered
    }

    /// Fan one event out to every registered channel of every user.
    pub async fn broadcast(&self, event: HubEvent) -> usize {
        let map = self.connections.read().await;
        map.values()
            .flatten()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .values()
            .flatten()
            .map(|h| ConnectionInfo {
                connection_id: h.connection_id.clone(),
                user_name: h.user_name.clone(),
                client_ip: h.client_ip.clone(),
                opened_at: h.opened_at,
            })
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.values().map(Vec::len).sum()
    }

    /// Events discarded by full channels since process start.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close every channel; used on shutdown.
    pub async fn close_all(&self) {
        let mut map = self.connections.write().await;
        for handle in map.values().flatten() {
            handle.close();
        }
        map.clear();
    }
}
