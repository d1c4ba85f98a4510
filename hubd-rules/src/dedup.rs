//! Time-bounded dedup windows, one per `(task, interface)` pair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hubd_core::Row;

/// Remembers row keys seen within `ttl`; keys expire lazily on access.
pub struct DedupWindow {
    seen: HashMap<String, Instant>,
    ttl: Duration,
}

impl DedupWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
        }
    }

    /// Returns `true` when the key is new within the window (and records
    /// it); `false` marks a duplicate.
    pub fn admit(&mut self, key: &str) -> bool {
        let now = Instant::now();
        if self.seen.len() > 65_536 {
            self.sweep(now);
        }
        match self.seen.get(key) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                self.seen.insert(key.to_string(), now);
                true
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen.retain(|_, at| now.duration_since(*at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Stable dedup key over the configured fields.
pub fn row_key(row: &Row, key_fields: &[String]) -> String {
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        parts.push(
            row.get(field)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".into()),
        );
    }
    parts.join("\u{1f}")
}
