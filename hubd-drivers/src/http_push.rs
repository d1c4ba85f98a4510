//! HTTP push driver: webhook ingest into a bounded ring buffer.
//!
//! The manager registers the driver's `url_suffix` in its routing table;
//! the webhook route hands accepted payloads to `receive_push`. Sync
//! workers drain the buffer in arrival order. On overflow the oldest
//! entry is evicted and a drop counter incremented.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hubd_catalog::model::DataSource;
use hubd_core::{HubError, HubResult, Row};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::config::HttpPushConfig;
use crate::driver::{Capability, Driver, DriverStats, HealthProbe, StagedEntry, StatsCell};

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PushEntry {
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub struct HttpPushDriver {
    source_id: String,
    config: HttpPushConfig,
    capacity: usize,
    buffer: Mutex<VecDeque<PushEntry>>,
    dropped: AtomicU64,
    stats: Arc<StatsCell>,
}

impl HttpPushDriver {
    pub fn new(source: &DataSource, default_capacity: usize) -> HubResult<Self> {
        let config = HttpPushConfig::from_config(&source.connection_config)?;
        let capacity = config.buffer_capacity.unwrap_or(default_capacity).max(1);
        Ok(Self {
            source_id: source.id.clone(),
            config,
            capacity,
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            stats: StatsCell::new(),
        })
    }

    pub fn url_suffix(&self) -> &str {
        &self.config.url_suffix
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Non-destructive snapshot of the buffered payloads, oldest first.
    pub async fn received_data(&self) -> Vec<PushEntry> {
        self.buffer.lock().await.iter().cloned().collect()
    }

    fn verify(&self, headers: &http::HeaderMap, body: &[u8]) -> HubResult<()> {
        if let Some(expected) = &self.config.token {
            let presented = headers
                .get("x-webhook-token")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if presented != expected {
                return Err(HubError::Unauthorized("webhook token mismatch".into()));
            }
        }
        if let Some(secret) = &self.config.hmac_secret {
            let presented = headers
                .get("x-hub-signature")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim_start_matches("sha256=").to_string())
                .ok_or_else(|| HubError::Unauthorized("missing webhook signature".into()))?;
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .map_err(|e| HubError::internal(e.to_string()))?;
            mac.update(body);
            let expected = hex::encode(mac.finalize().into_bytes());
            if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                return Err(HubError::Unauthorized("webhook signature mismatch".into()));
            }
        }
        Ok(())
    }
}

fn payload_row(payload: serde_json::Value) -> Row {
    match payload {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = Row::new();
            map.insert("payload".into(), other);
            map
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Driver for HttpPushDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "http_post"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Push)
    }

    async fn start(&self) -> HubResult<()> {
        self.stats.set_running(true);
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        self.stats.set_running(false);
        Ok(())
    }

    async fn health_check(&self) -> HealthProbe {
        let started = Instant::now();
        let size = self.buffer.lock().await.len();
        let latency = started.elapsed().as_millis() as u64;
        if self.stats.is_running() {
            HealthProbe::up(latency)
        } else {
            HealthProbe::down(latency, format!("not started ({size} buffered)"))
        }
    }

    async fn receive_push(&self, headers: &http::HeaderMap, body: bytes::Bytes) -> HubResult<()> {
        if !self.stats.is_running() {
            return Err(HubError::Busy("push driver not started".into()));
        }
        self.verify(headers, &body)?;
        let payload: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| HubError::invalid_input("body", format!("invalid JSON: {e}")))?;
        let entry = PushEntry {
            received_at: Utc::now(),
            payload,
        };
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(entry);
        drop(buffer);
        self.stats.record_fetch();
        Ok(())
    }

    async fn drain(&self, max: usize) -> HubResult<Vec<StagedEntry>> {
        let mut buffer = self.buffer.lock().await;
        let take = max.min(buffer.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let entry = buffer.pop_front().expect("len checked");
            out.push(StagedEntry {
                row: payload_row(entry.payload),
                token: None,
            });
        }
        Ok(out)
    }

    async fn peek(&self, max: usize) -> HubResult<Vec<StagedEntry>> {
        let buffer = self.buffer.lock().await;
        Ok(buffer
            .iter()
            .take(max)
            .map(|entry| StagedEntry {
                row: payload_row(entry.payload.clone()),
                token: None,
            })
            .collect())
    }

    fn stats(&self) -> DriverStats {
        let size = self.buffer.try_lock().map(|b| b.len()).unwrap_or_default();
        self.stats.snapshot(Some(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubd_catalog::model::{ResourceStatus, SourceCategory};

    fn source(config: serde_json::Value) -> DataSource {
        DataSource {
            id: "src-1".into(),
            library_id: "lib".into(),
            name: "sensor feed".into(),
            category: SourceCategory::Http,
            source_type: "http_post".into(),
            connection_config: config,
            params_config: serde_json::json!({}),
            script: None,
            script_enabled: false,
            status: ResourceStatus::Active,
            is_resident: true,
            created_at: Utc::now(),
        }
    }

    fn driver(config: serde_json::Value) -> HttpPushDriver {
        HttpPushDriver::new(&source(config), DEFAULT_BUFFER_CAPACITY).unwrap()
    }

    #[tokio::test]
    async fn buffers_in_insertion_order() {
        let d = driver(serde_json::json!({"url_suffix": "sensor1"}));
        d.start().await.unwrap();
        for v in 1..=3 {
            d.receive_push(
                &http::HeaderMap::new(),
                bytes::Bytes::from(format!("{{\"v\":{v}}}")),
            )
            .await
            .unwrap();
        }
        let snapshot = d.received_data().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].payload["v"], 1);
        assert_eq!(snapshot[2].payload["v"], 3);

        let drained = d.drain(10).await.unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].row["v"], 1);
        assert_eq!(d.received_data().await.len(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let d = driver(serde_json::json!({"url_suffix": "s", "buffer_capacity": 2}));
        d.start().await.unwrap();
        for v in 1..=3 {
            d.receive_push(
                &http::HeaderMap::new(),
                bytes::Bytes::from(format!("{{\"v\":{v}}}")),
            )
            .await
            .unwrap();
        }
        let snapshot = d.received_data().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].payload["v"], 2);
        assert_eq!(d.dropped_count(), 1);
    }

    #[tokio::test]
    async fn rejects_when_not_started() {
        let d = driver(serde_json::json!({"url_suffix": "s"}));
        let err = d
            .receive_push(&http::HeaderMap::new(), bytes::Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.business_status(), 503);
    }

    #[tokio::test]
    async fn token_verification() {
        let d = driver(serde_json::json!({"url_suffix": "s", "token": "shh"}));
        d.start().await.unwrap();
        let mut headers = http::HeaderMap::new();
        let err = d
            .receive_push(&headers, bytes::Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.business_status(), 401);

        headers.insert("x-webhook-token", "shh".parse().unwrap());
        d.receive_push(&headers, bytes::Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hmac_verification() {
        let d = driver(serde_json::json!({"url_suffix": "s", "hmac_secret": "k"}));
        d.start().await.unwrap();
        let body = b"{\"v\":1}";
        let mut mac = Hmac::<Sha256>::new_from_slice(b"k").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = http::HeaderMap::new();
        headers.insert(
            "x-hub-signature",
            format!("sha256={sig}").parse().unwrap(),
        );
        d.receive_push(&headers, bytes::Bytes::from_static(body))
            .await
            .unwrap();

        let mut bad = http::HeaderMap::new();
        bad.insert("x-hub-signature", "sha256=deadbeef".parse().unwrap());
        assert!(d
            .receive_push(&bad, bytes::Bytes::from_static(body))
            .await
            .is_err());
    }
}
