use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use serde::{Deserialize, Serialize};

use super::str_enum;

str_enum! {
    TaskType {
        BatchSync => "batch_sync",
        RealtimeSync => "realtime_sync",
    }
}

str_enum! {
    TriggerType {
        Manual => "manual",
        Once => "once",
        Interval => "interval",
        Cron => "cron",
    }
}

str_enum! {
    /// Task lifecycle: `draft -> active <-> paused`; terminal only via delete.
    TaskStatus {
        Draft => "draft",
        Active => "active",
        Paused => "paused",
    }
}

str_enum! {
    /// Aggregate execution state of a task, independent from lifecycle.
    ExecutionStatus {
        Idle => "idle",
        Running => "running",
        Success => "success",
        Failed => "failed",
    }
}

str_enum! {
    ExecStatus {
        Running => "running",
        Success => "success",
        Failed => "failed",
        Cancelled => "cancelled",
        /// A scheduler firing refused because the previous execution of the
        /// same task was still running.
        Skipped => "skipped",
    }
}

str_enum! {
    ExecutionKind {
        Manual => "manual",
        Scheduled => "scheduled",
        Retry => "retry",
    }
}

/// A persisted specification for moving data from one source into one or
/// more data interfaces on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncTask {
    pub id: String,
    pub library_type: String,
    pub library_id: String,
    pub data_source_id: String,
    pub interface_ids: Vec<String>,
    /// Per-interface overrides, merged over `config` at fan-out time.
    pub interface_configs: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub task_type: TaskType,
    #[sqlx(try_from = "String")]
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    #[sqlx(try_from = "String")]
    pub execution_status: ExecutionStatus,
    pub config: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl SyncTask {
    /// Effective config for one interface: per-interface overrides layered
    /// over the task config.
    pub fn config_for(&self, interface_id: &str) -> serde_json::Value {
        let mut merged = match &self.config {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Some(overlay) = self
            .interface_configs
            .get(interface_id)
            .and_then(|v| v.as_object())
        {
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
        }
        serde_json::Value::Object(merged)
    }
}

/// Exactly one trigger payload must match the trigger type.
pub fn validate_trigger(
    trigger: TriggerType,
    cron_expression: Option<&str>,
    interval_seconds: Option<i64>,
    scheduled_time: Option<DateTime<Utc>>,
) -> HubResult<()> {
    let (cron, interval, once) = (
        cron_expression.map(str::trim).filter(|s| !s.is_empty()),
        interval_seconds,
        scheduled_time,
    );
    match trigger {
        TriggerType::Manual => {
            if cron.is_some() || interval.is_some() || once.is_some() {
                return Err(HubError::invalid_input(
                    "trigger_type",
                    "manual tasks take no trigger payload",
                ));
            }
        }
        TriggerType::Cron => {
            if interval.is_some() || once.is_some() {
                return Err(HubError::invalid_input(
                    "trigger_type",
                    "cron tasks take only cron_expression",
                ));
            }
            let expr =
                cron.ok_or_else(|| HubError::invalid_input("cron_expression", "required"))?;
            expr.parse::<cron_expr_check::Probe>()
                .map_err(|e| HubError::invalid_input("cron_expression", e))?;
        }
        TriggerType::Interval => {
            if cron.is_some() || once.is_some() {
                return Err(HubError::invalid_input(
                    "trigger_type",
                    "interval tasks take only interval_seconds",
                ));
            }
            match interval {
                Some(secs) if secs > 0 => {}
                _ => {
                    return Err(HubError::invalid_input(
                        "interval_seconds",
                        "must be a positive integer",
                    ))
                }
            }
        }
        TriggerType::Once => {
            if cron.is_some() || interval.is_some() {
                return Err(HubError::invalid_input(
                    "trigger_type",
                    "once tasks take only scheduled_time",
                ));
            }
            once.ok_or_else(|| HubError::invalid_input("scheduled_time", "required"))?;
        }
    }
    Ok(())
}

/// Thin probe so trigger validation does not force callers to depend on
/// the scheduler crate; the real schedule parsing lives there.
mod cron_expr_check {
    pub struct Probe;

    impl std::str::FromStr for Probe {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            // 5-field (minute-led) and 6-field (second-led) forms accepted.
            let fields = s.split_whitespace().count();
            if (5..=7).contains(&fields) {
                Ok(Probe)
            } else {
                Err(format!("expected 5-7 whitespace-separated fields, got {fields}"))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSyncTask {
    pub library_id: String,
    pub data_source_id: String,
    pub interface_ids: Vec<String>,
    #[serde(default)]
    pub interface_configs: serde_json::Value,
    pub task_type: TaskType,
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub created_by: String,
}

impl CreateSyncTask {
    pub fn validate(&self) -> HubResult<()> {
        if self.interface_ids.is_empty() {
            return Err(HubError::invalid_input(
                "interface_ids",
                "at least one interface required",
            ));
        }
        validate_trigger(
            self.trigger_type,
            self.cron_expression.as_deref(),
            self.interval_seconds,
            self.scheduled_time,
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSyncTask {
    pub interface_ids: Option<Vec<String>>,
    pub interface_configs: Option<serde_json::Value>,
    pub trigger_type: Option<TriggerType>,
    pub cron_expression: Option<Option<String>>,
    pub interval_seconds: Option<Option<i64>>,
    pub scheduled_time: Option<Option<DateTime<Utc>>>,
    pub config: Option<serde_json::Value>,
}

impl UpdateSyncTask {
    pub fn touches_trigger(&self) -> bool {
        self.trigger_type.is_some()
            || self.cron_expression.is_some()
            || self.interval_seconds.is_some()
            || self.scheduled_time.is_some()
    }
}

/// Progress snapshot persisted with a running execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub error_count: u64,
    pub progress_percent: Option<f64>,
}

/// One run of a task against one data interface. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncTaskExecution {
    pub id: String,
    pub task_id: String,
    pub interface_id: String,
    #[sqlx(try_from = "String")]
    pub execution_type: ExecutionKind,
    #[sqlx(try_from = "String")]
    pub status: ExecStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub record_count: Option<i64>,
    pub error_message: Option<String>,
    pub progress: Option<serde_json::Value>,
}
