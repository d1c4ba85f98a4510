//! Best-effort async usage logging.
//!
//! Log records travel over a bounded channel to a writer task; overflow
//! increments a loss counter and never back-pressures the request path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hubd_catalog::model::ApiUsageLog;
use tokio::sync::mpsc;

use crate::resolve::ShareStore;

#[derive(Clone)]
pub struct UsageLogger {
    tx: mpsc::Sender<ApiUsageLog>,
    dropped: Arc<AtomicU64>,
}

impl UsageLogger {
    pub fn start(store: Arc<dyn ShareStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ApiUsageLog>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                if let Err(e) = store.insert_usage_log(&log).await {
                    tracing::warn!(error = %e, "usage log write failed");
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fire-and-forget; loss is counted, never surfaced.
    pub fn submit(&self, log: ApiUsageLog) {
        if self.tx.try_send(log).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
