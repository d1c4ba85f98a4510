//! The polymorphic driver contract.
//!
//! Every data source is served by one driver instance owned by the
//! manager. Variants implement a subset of the capability set; callers
//! probe with [`Driver::supports`] instead of downcasting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use hubd_core::{HubError, HubResult, Row};
use tokio_util::sync::CancellationToken;

/// Lazy, finite, non-restartable row sequence produced by pull drivers.
/// An `Err` item terminates the sequence.
pub type RowStream = BoxStream<'static, HubResult<Row>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Pull rows on demand (`fetch`).
    Fetch,
    /// Accept pushed payloads and stage them (`receive_push` / `drain`).
    Push,
    /// Consume a broker subscription into the staging buffer (`drain`).
    Stream,
    /// Post-write acknowledgement (`commit`).
    Commit,
}

/// One staged entry from a push buffer or stream subscription. `token`
/// carries the broker acknowledgement handle where one exists.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub row: Row,
    pub token: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthProbe {
    pub ok: bool,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

impl HealthProbe {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms,
            detail: None,
        }
    }

    pub fn down(latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DriverStats {
    pub fetch_count: u64,
    pub error_count: u64,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub buffer_size: Option<usize>,
    pub running: bool,
}

/// Fetch-time parameters: the task/interface config merged over the
/// source `params_config`.
#[derive(Debug, Clone, Default)]
pub struct FetchParams {
    pub config: serde_json::Value,
}

impl FetchParams {
    pub fn new(config: serde_json::Value) -> Self {
        Self { config }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }

    /// Substitution map for `{{name}}` templates.
    pub fn parameters(&self) -> serde_json::Map<String, serde_json::Value> {
        self.config
            .get("parameters")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_rows(&self) -> Option<u64> {
        self.u64_param("max_rows")
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.u64_param("timeout_secs")
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn source_id(&self) -> &str;

    /// Concrete type label, e.g. `postgres`, `http_post`.
    fn type_name(&self) -> &str;

    fn supports(&self, capability: Capability) -> bool;

    /// Open pools/sessions. Idempotent; meaningful for resident, stream
    /// and http-post drivers.
    async fn start(&self) -> HubResult<()> {
        Ok(())
    }

    /// Stop accepting work and release sessions. In-flight fetches keep
    /// their own handles and run to completion.
    async fn stop(&self) -> HubResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> HealthProbe;

    async fn fetch(&self, _params: FetchParams, _cancel: CancellationToken) -> HubResult<RowStream> {
        Err(HubError::driver(format!(
            "driver {} does not support fetch",
            self.type_name()
        )))
    }

    /// Accept one pushed payload into the staging buffer.
    async fn receive_push(
        &self,
        _headers: &http::HeaderMap,
        _body: bytes::Bytes,
    ) -> HubResult<()> {
        Err(HubError::driver(format!(
            "driver {} does not support push",
            self.type_name()
        )))
    }

    /// Remove up to `max` staged entries in arrival order.
    async fn drain(&self, _max: usize) -> HubResult<Vec<StagedEntry>> {
        Err(HubError::driver(format!(
            "driver {} does not support drain",
            self.type_name()
        )))
    }

    /// Non-destructive look at staged entries in arrival order.
    async fn peek(&self, _max: usize) -> HubResult<Vec<StagedEntry>> {
        Err(HubError::driver(format!(
            "driver {} does not support peek",
            self.type_name()
        )))
    }

    /// Acknowledge staged entries after the downstream write committed.
    async fn commit(&self, _entries: &[StagedEntry]) -> HubResult<()> {
        Ok(())
    }

    fn stats(&self) -> DriverStats;
}

/// Shared counters every variant updates; snapshots feed `stats()`.
#[derive(Default)]
pub struct StatsCell {
    fetch_count: AtomicU64,
    error_count: AtomicU64,
    last_ok_unix_ms: AtomicU64,
    running: AtomicBool,
}

impl StatsCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_fetch(&self) {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.touch_ok();
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch_ok(&self) {
        self.last_ok_unix_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, buffer_size: Option<usize>) -> DriverStats {
        let ms = self.last_ok_unix_ms.load(Ordering::Relaxed);
        DriverStats {
            fetch_count: self.fetch_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_ok_at: if ms > 0 {
                DateTime::from_timestamp_millis(ms as i64)
            } else {
                None
            },
            buffer_size,
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_cell_snapshot() {
        let cell = StatsCell::new();
        cell.record_fetch();
        cell.record_fetch();
        cell.record_error();
        cell.set_running(true);
        let snap = cell.snapshot(Some(7));
        assert_eq!(snap.fetch_count, 2);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.buffer_size, Some(7));
        assert!(snap.running);
        assert!(snap.last_ok_at.is_some());
    }

    #[test]
    fn fetch_params_accessors() {
        let params = FetchParams::new(serde_json::json!({
            "sql_query": "SELECT 1",
            "max_rows": 10,
            "parameters": {"region": "eu"}
        }));
        assert_eq!(params.str_param("sql_query"), Some("SELECT 1"));
        assert_eq!(params.max_rows(), Some(10));
        assert_eq!(params.parameters()["region"], "eu");
    }
}
