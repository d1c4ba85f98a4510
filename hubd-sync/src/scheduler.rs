//! Trigger scheduler: maintains `{task_id, trigger, next_fire_at}`
//! entries and dispatches due tasks into the service.
//!
//! Missed fires coalesce: next-occurrence math always starts from "now",
//! so after downtime at most one (the latest) missed fire runs.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubd_catalog::model::{SyncTask, TriggerType};
use hubd_core::{HubError, HubResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// What the scheduler fires into; implemented by the task service.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn fire(&self, task_id: &str) -> HubResult<FireOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// Previous execution still running; recorded as skipped.
    Skipped,
    /// Task no longer schedulable; drop the entry.
    Gone,
}

#[derive(Clone)]
pub enum TriggerSpec {
    Once(DateTime<Utc>),
    Interval {
        every: chrono::Duration,
        anchor: DateTime<Utc>,
    },
    Cron(cron::Schedule),
}

impl TriggerSpec {
    /// Build from a task row; `None` for manual tasks.
    pub fn from_task(task: &SyncTask) -> HubResult<Option<Self>> {
        match task.trigger_type {
            TriggerType::Manual => Ok(None),
            TriggerType::Once => {
                let at = task.scheduled_time.ok_or_else(|| {
                    HubError::invalid_input("scheduled_time", "required for once trigger")
                })?;
                Ok(Some(TriggerSpec::Once(at)))
            }
            TriggerType::Interval => {
                let secs = task.interval_seconds.filter(|s| *s > 0).ok_or_else(|| {
                    HubError::invalid_input("interval_seconds", "required for interval trigger")
                })?;
                Ok(Some(TriggerSpec::Interval {
                    every: chrono::Duration::seconds(secs),
                    anchor: task.scheduled_time.unwrap_or_else(Utc::now),
                }))
            }
            TriggerType::Cron => {
                let raw = task.cron_expression.as_deref().ok_or_else(|| {
                    HubError::invalid_input("cron_expression", "required for cron trigger")
                })?;
                Ok(Some(TriggerSpec::Cron(parse_cron(raw)?)))
            }
        }
    }

    /// First fire once the entry is added: `once` in the past fires at
    /// add-time, `interval` starts at `max(anchor, now)`.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSpec::Once(at) => Some((*at).max(now)),
            TriggerSpec::Interval { anchor, .. } => Some((*anchor).max(now)),
            TriggerSpec::Cron(schedule) => schedule.after(&now).next(),
        }
    }

    /// Fire after a firing at `now`; `None` removes the entry.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSpec::Once(_) => None,
            TriggerSpec::Interval { every, .. } => Some(now + *every),
            TriggerSpec::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

/// Accept standard 5-field cron by prefixing a seconds column; the cron
/// crate itself wants 6 or 7 fields. The service timezone is UTC.
pub fn parse_cron(expression: &str) -> HubResult<cron::Schedule> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| HubError::invalid_input("cron_expression", e))
}

struct Entry {
    spec: TriggerSpec,
    next_fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduledEntryInfo {
    pub task_id: String,
    pub next_fire_at: DateTime<Utc>,
}

pub struct Scheduler {
    entries: RwLock<HashMap<String, Entry>>,
    tick: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            tick,
            shutdown: CancellationToken::new(),
        })
    }

    /// Register (or re-register) a task. Manual tasks are a no-op.
    /// Returns the computed next fire time.
    pub async fn add(&self, task: &SyncTask) -> HubResult<Option<DateTime<Utc>>> {
        let Some(spec) = TriggerSpec::from_task(task)? else {
            return Ok(None);
        };
        let now = Utc::now();
        let Some(next_fire_at) = spec.first_fire(now) else {
            return Ok(None);
        };
        self.entries.write().await.insert(
            task.id.clone(),
            Entry { spec, next_fire_at },
        );
        tracing::info!(task = %task.id, next = %next_fire_at, "scheduler entry added");
        Ok(Some(next_fire_at))
    }

    pub async fn remove(&self, task_id: &str) -> bool {
        let removed = self.entries.write().await.remove(task_id).is_some();
        if removed {
            tracing::info!(task = task_id, "scheduler entry removed");
        }
        removed
    }

    /// Re-derive the entry after a trigger change.
    pub async fn recompute(&self, task: &SyncTask) -> HubResult<Option<DateTime<Utc>>> {
        self.remove(&task.id).await;
        self.add(task).await
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.entries.read().await.contains_key(task_id)
    }

    pub async fn entries(&self) -> Vec<ScheduledEntryInfo> {
        let mut list: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(task_id, entry)| ScheduledEntryInfo {
                task_id: task_id.clone(),
                next_fire_at: entry.next_fire_at,
            })
            .collect();
        list.sort_by_key(|e| e.next_fire_at);
        list
    }

    pub async fn next_fire(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .await
            .get(task_id)
            .map(|e| e.next_fire_at)
    }

    /// Run the dispatch loop until shutdown.
    pub fn run(self: &Arc<Self>, launcher: Arc<dyn TaskLauncher>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                scheduler.dispatch_due(&launcher).await;
            }
            tracing::info!("scheduler stopped");
        });
    }

    /// One pass: fire everything due, advancing or removing entries. The
    /// lock is released before any launcher call.
    pub async fn dispatch_due(&self, launcher: &Arc<dyn TaskLauncher>) {
        let now = Utc::now();
        let due: Vec<String> = {
            let mut entries = self.entries.write().await;
            let mut due = Vec::new();
            entries.retain(|task_id, entry| {
                if entry.next_fire_at > now {
                    return true;
                }
                due.push(task_id.clone());
                match entry.spec.next_fire(now) {
                    Some(next) => {
                        entry.next_fire_at = next;
                        true
                    }
                    None => false,
                }
            });
            due
        };
        for task_id in due {
            match launcher.fire(&task_id).await {
                Ok(FireOutcome::Started) => {}
                Ok(FireOutcome::Skipped) => {
                    tracing::info!(task = %task_id, "firing skipped, previous execution running");
                }
                Ok(FireOutcome::Gone) => {
                    self.entries.write().await.remove(&task_id);
                }
                Err(e) => {
                    // Failure to submit is logged; the entry stays and the
                    // trigger fires again next time.
                    tracing::warn!(task = %task_id, error = %e, "scheduled fire failed");
                }
            }
            if self.shutdown.is_cancelled() {
                break;
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cron_accepts_five_and_six_fields() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 0 3 * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn once_in_past_fires_at_add_time() {
        let now = Utc::now();
        let spec = TriggerSpec::Once(now - chrono::Duration::hours(1));
        assert_eq!(spec.first_fire(now), Some(now));
        assert_eq!(spec.next_fire(now), None);
    }

    #[test]
    fn interval_starts_at_anchor_or_now() {
        let now = Utc::now();
        let future = now + chrono::Duration::minutes(10);
        let spec = TriggerSpec::Interval {
            every: chrono::Duration::seconds(60),
            anchor: future,
        };
        assert_eq!(spec.first_fire(now), Some(future));
        let spec = TriggerSpec::Interval {
            every: chrono::Duration::seconds(60),
            anchor: now - chrono::Duration::minutes(10),
        };
        assert_eq!(spec.first_fire(now), Some(now));
        assert_eq!(
            spec.next_fire(now),
            Some(now + chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn cron_next_is_strictly_future() {
        let now = Utc::now();
        let spec = TriggerSpec::Cron(parse_cron("* * * * *").unwrap());
        let next = spec.first_fire(now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::seconds(60));
    }

    #[test]
    fn missed_cron_fires_coalesce() {
        // After an hour of downtime a minutely cron yields exactly one
        // upcoming occurrence, not sixty.
        let spec = TriggerSpec::Cron(parse_cron("* * * * *").unwrap());
        let now = Utc::now();
        let next = spec.next_fire(now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::seconds(60));
    }
}
