//! Sync task service: guardian of the task state machines.
//!
//! Lifecycle `draft -> active <-> paused` and execution aggregate
//! `idle -> running -> success|failed -> idle` are enforced here; the
//! engine and scheduler stay mechanism-only. A Start (or a scheduled
//! fire) fans out into one execution per interface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hubd_catalog::model::{
    CreateSyncTask, ExecStatus, ExecutionKind, ExecutionStatus, SourceCategory, SyncTask,
    SyncTaskExecution, TaskStatus, TaskType, TriggerType, UpdateSyncTask,
};
use hubd_core::{HubError, HubResult, Page, Pageable};
use hubd_events::{EventHub, HubEvent};
use tokio::sync::mpsc;

use crate::engine::{OutcomeNotice, SyncEngine, SyncMode, SyncRequest};
use crate::scheduler::{FireOutcome, Scheduler, TaskLauncher};
use crate::store::TaskStore;

/// How long Pause waits for a cancelled execution to unwind.
const PAUSE_WAIT: Duration = Duration::from_secs(10);

pub struct SyncTaskService {
    store: Arc<dyn TaskStore>,
    engine: Arc<SyncEngine>,
    scheduler: Arc<Scheduler>,
    events: Arc<EventHub>,
}

impl SyncTaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        engine: Arc<SyncEngine>,
        scheduler: Arc<Scheduler>,
        events: Arc<EventHub>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            scheduler,
            events,
        })
    }

    /// Consume engine outcome notices: refresh each task's aggregate
    /// execution state and notify the task owner. Spawned once at boot.
    pub fn start_aggregator(self: &Arc<Self>, mut outcomes: mpsc::UnboundedReceiver<OutcomeNotice>) {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = outcomes.recv().await {
                if let Err(e) = service.apply_outcome(&notice).await {
                    tracing::warn!(task = %notice.task_id, error = %e, "outcome aggregation failed");
                }
            }
        });
    }

    async fn apply_outcome(&self, notice: &OutcomeNotice) -> HubResult<()> {
        let aggregate = self.recompute_aggregate(&notice.task_id).await?;
        let task = self.store.get_task(&notice.task_id).await?;
        let event = HubEvent::for_user(
            "sync_execution_finished",
            &task.created_by,
            serde_json::json!({
                "task_id": notice.task_id,
                "execution_id": notice.execution_id,
                "interface_id": notice.interface_id,
                "status": notice.status,
                "record_count": notice.record_count,
                "error": notice.error,
            }),
        );
        self.events.send_to_user(&task.created_by, event).await;
        tracing::debug!(task = %notice.task_id, aggregate = %aggregate, "aggregate refreshed");
        Ok(())
    }

    /// Aggregate rule: running if any runs; else failed if any latest
    /// per-interface run failed; else success if all succeeded; else idle.
    async fn recompute_aggregate(&self, task_id: &str) -> HubResult<ExecutionStatus> {
        let task = self.store.get_task(task_id).await?;
        let recent = self
            .store
            .latest_executions(task_id, (task.interface_ids.len() as i64 * 4).max(16))
            .await?;
        let mut latest_per_interface: std::collections::HashMap<&str, &SyncTaskExecution> =
            std::collections::HashMap::new();
        for exec in &recent {
            if exec.status == ExecStatus::Skipped {
                continue;
            }
            latest_per_interface.entry(&exec.interface_id).or_insert(exec);
        }
        let statuses: Vec<ExecStatus> =
            latest_per_interface.values().map(|e| e.status).collect();
        let aggregate = if statuses.iter().any(|s| *s == ExecStatus::Running) {
            ExecutionStatus::Running
        } else if statuses.iter().any(|s| *s == ExecStatus::Failed) {
            ExecutionStatus::Failed
        } else if !statuses.is_empty() && statuses.iter().all(|s| *s == ExecStatus::Success) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Idle
        };
        self.store.set_execution_status(task_id, aggregate).await?;
        Ok(aggregate)
    }

    // ── CRUD and lifecycle ────────────────────────────────────────────────

    pub async fn create(&self, req: CreateSyncTask) -> HubResult<SyncTask> {
        let task = self.store.create_task(req).await?;
        tracing::info!(task = %task.id, trigger = %task.trigger_type, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> HubResult<SyncTask> {
        self.store.get_task(id).await
    }

    pub async fn list(
        &self,
        pageable: &Pageable,
        status: Option<TaskStatus>,
        library_id: Option<&str>,
    ) -> HubResult<Page<SyncTask>> {
        self.store.list_tasks(pageable, status, library_id).await
    }

    pub async fn executions(
        &self,
        task_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SyncTaskExecution>> {
        self.store.get_task(task_id).await?;
        self.store.list_executions(task_id, pageable).await
    }

    /// `draft|paused -> active`; schedulable triggers get an entry.
    pub async fn activate(&self, id: &str) -> HubResult<SyncTask> {
        let task = self.store.get_task(id).await?;
        if !matches!(task.status, TaskStatus::Draft | TaskStatus::Paused) {
            return Err(HubError::Conflict(format!(
                "cannot activate task in state {}",
                task.status
            )));
        }
        self.store.set_status(id, TaskStatus::Active).await?;
        let task = self.store.get_task(id).await?;
        let next = self.scheduler.add(&task).await?;
        self.store.set_next_run(id, next).await?;
        tracing::info!(task = id, "task activated");
        Ok(task)
    }

    /// `active -> paused`; a running execution is cancelled and awaited.
    pub async fn pause(&self, id: &str) -> HubResult<SyncTask> {
        let task = self.store.get_task(id).await?;
        if task.status != TaskStatus::Active {
            return Err(HubError::Conflict(format!(
                "cannot pause task in state {}",
                task.status
            )));
        }
        if self.engine.is_task_running(id) {
            self.engine.cancel_task(id);
            if !self.engine.wait_task_idle(id, PAUSE_WAIT).await {
                return Err(HubError::Busy(
                    "execution did not stop within the pause window".into(),
                ));
            }
        }
        self.scheduler.remove(id).await;
        self.store.set_next_run(id, None).await?;
        self.store.set_status(id, TaskStatus::Paused).await?;
        tracing::info!(task = id, "task paused");
        self.store.get_task(id).await
    }

    /// Partial update; allowed in draft/paused, and for active tasks only
    /// while not running. A trigger change recomputes the schedule.
    pub async fn update(&self, id: &str, req: UpdateSyncTask) -> HubResult<SyncTask> {
        let task = self.store.get_task(id).await?;
        let running = task.execution_status == ExecutionStatus::Running
            || self.engine.is_task_running(id);
        if task.status == TaskStatus::Active && running {
            return Err(HubError::Conflict(
                "cannot update an active task while it is running".into(),
            ));
        }
        let trigger_changed = req.touches_trigger();
        let task = self.store.update_task(id, req).await?;
        if trigger_changed && task.status == TaskStatus::Active {
            let next = self.scheduler.recompute(&task).await?;
            self.store.set_next_run(id, next).await?;
        }
        Ok(task)
    }

    /// Allowed unless an execution is running. Executions cascade.
    pub async fn delete(&self, id: &str) -> HubResult<()> {
        let task = self.store.get_task(id).await?;
        if task.execution_status == ExecutionStatus::Running || self.engine.is_task_running(id) {
            return Err(HubError::Conflict(
                "cannot delete a task while it is running".into(),
            ));
        }
        self.scheduler.remove(id).await;
        self.store.delete_task(id).await?;
        tracing::info!(task = id, "task deleted");
        Ok(())
    }

    /// Manual start: `active && not running`.
    pub async fn start(&self, id: &str) -> HubResult<Vec<SyncTaskExecution>> {
        let task = self.store.get_task(id).await?;
        if task.status != TaskStatus::Active {
            return Err(HubError::Conflict(format!(
                "cannot start task in state {}",
                task.status
            )));
        }
        if task.execution_status == ExecutionStatus::Running || self.engine.is_task_running(id) {
            return Err(HubError::Conflict("task is already running".into()));
        }
        self.fan_out(&task, ExecutionKind::Manual, None).await
    }

    /// Cancel the running executions; they settle as `cancelled` and the
    /// aggregate returns to idle.
    pub async fn stop(&self, id: &str) -> HubResult<usize> {
        let task = self.store.get_task(id).await?;
        if task.status != TaskStatus::Active || !self.engine.is_task_running(id) {
            return Err(HubError::Conflict("task is not running".into()));
        }
        let cancelled = self.engine.cancel_task(id);
        tracing::info!(task = id, cancelled, "task stop requested");
        Ok(cancelled)
    }

    /// Re-run the failed interfaces as fresh executions under the same
    /// task (`execution_type = retry`). Statistics are preserved.
    pub async fn retry(&self, id: &str) -> HubResult<Vec<SyncTaskExecution>> {
        let task = self.store.get_task(id).await?;
        if task.execution_status != ExecutionStatus::Failed {
            return Err(HubError::Conflict(format!(
                "retry requires a failed task, current execution state is {}",
                task.execution_status
            )));
        }
        let recent = self
            .store
            .latest_executions(id, (task.interface_ids.len() as i64 * 4).max(16))
            .await?;
        let mut failed_interfaces = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for exec in &recent {
            if exec.status == ExecStatus::Skipped || !seen.insert(exec.interface_id.as_str()) {
                continue;
            }
            if exec.status == ExecStatus::Failed {
                failed_interfaces.push(exec.interface_id.clone());
            }
        }
        if failed_interfaces.is_empty() {
            failed_interfaces = task.interface_ids.clone();
        }
        self.fan_out(&task, ExecutionKind::Retry, Some(failed_interfaces))
            .await
    }

    pub fn engine_stats(&self) -> crate::engine::EngineStats {
        self.engine.statistics()
    }

    pub async fn scheduler_entries(&self) -> Vec<crate::scheduler::ScheduledEntryInfo> {
        self.scheduler.entries().await
    }

    /// Re-register every active schedulable task after a restart.
    pub async fn restore_schedules(&self) -> HubResult<usize> {
        let tasks = self.store.schedulable_tasks().await?;
        let mut restored = 0usize;
        for task in tasks {
            match self.scheduler.add(&task).await {
                Ok(next) => {
                    self.store.set_next_run(&task.id, next).await?;
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "schedule restore failed")
                }
            }
        }
        tracing::info!(count = restored, "schedules restored");
        Ok(restored)
    }

    /// Create one execution per interface and submit each to the engine.
    async fn fan_out(
        &self,
        task: &SyncTask,
        kind: ExecutionKind,
        only_interfaces: Option<Vec<String>>,
    ) -> HubResult<Vec<SyncTaskExecution>> {
        let source = self.store.get_source(&task.data_source_id).await?;
        let library = self.store.get_library(&task.library_id).await?;
        let interface_ids = only_interfaces.unwrap_or_else(|| task.interface_ids.clone());

        let mode = match (task.task_type, source.category) {
            (TaskType::RealtimeSync, _)
            | (_, SourceCategory::Stream) => SyncMode::Drain,
            (_, SourceCategory::Http) if source.source_type == "http_post" => SyncMode::Drain,
            _ => SyncMode::Pull,
        };

        let mut executions = Vec::with_capacity(interface_ids.len());
        for interface_id in &interface_ids {
            let interface = self.store.get_interface(interface_id).await?;
            let execution = self
                .store
                .insert_execution(&task.id, interface_id, kind, ExecStatus::Running)
                .await?;
            let config = merge_config(&source.params_config, task.config_for(interface_id));
            let request = SyncRequest {
                execution_id: execution.id.clone(),
                task_id: task.id.clone(),
                interface_id: interface_id.clone(),
                data_source_id: task.data_source_id.clone(),
                schema: library.name_en.clone(),
                table: interface.name_en.clone(),
                fields: interface.fields().to_vec(),
                config,
                mode,
            };
            if let Err(e) = self.engine.submit(request) {
                self.store
                    .update_execution(
                        &execution.id,
                        hubd_catalog::ExecutionUpdate {
                            status: Some(ExecStatus::Failed),
                            end_time: Some(Utc::now()),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                return Err(e);
            }
            executions.push(execution);
        }
        self.store
            .set_execution_status(&task.id, ExecutionStatus::Running)
            .await?;
        tracing::info!(
            task = %task.id,
            kind = %kind,
            executions = executions.len(),
            "task fanned out"
        );
        Ok(executions)
    }
}

/// Task/interface config over the source's fetch defaults.
fn merge_config(base: &serde_json::Value, overlay: serde_json::Value) -> serde_json::Value {
    let mut merged = match base {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let serde_json::Value::Object(overlay) = overlay {
        for (k, v) in overlay {
            merged.insert(k, v);
        }
    }
    serde_json::Value::Object(merged)
}

#[async_trait]
impl TaskLauncher for SyncTaskService {
    /// Scheduled fire with the skip policy: a still-running previous
    /// execution records `skipped` history rows instead of stacking.
    async fn fire(&self, task_id: &str) -> HubResult<FireOutcome> {
        let task = match self.store.get_task(task_id).await {
            Ok(task) => task,
            Err(HubError::NotFound(_)) => return Ok(FireOutcome::Gone),
            Err(e) => return Err(e),
        };
        if task.status != TaskStatus::Active || task.trigger_type == TriggerType::Manual {
            return Ok(FireOutcome::Gone);
        }
        if task.execution_status == ExecutionStatus::Running
            || self.engine.is_task_running(task_id)
        {
            for interface_id in &task.interface_ids {
                let execution = self
                    .store
                    .insert_execution(
                        task_id,
                        interface_id,
                        ExecutionKind::Scheduled,
                        ExecStatus::Skipped,
                    )
                    .await?;
                self.store
                    .update_execution(
                        &execution.id,
                        hubd_catalog::ExecutionUpdate {
                            end_time: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            return Ok(FireOutcome::Skipped);
        }
        self.fan_out(&task, ExecutionKind::Scheduled, None).await?;
        let next = self.scheduler.next_fire(task_id).await;
        self.store.set_next_run(task_id, next).await?;
        Ok(FireOutcome::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::merge_config;

    #[test]
    fn merge_overlays_task_over_source() {
        let merged = merge_config(
            &serde_json::json!({"sql_query": "SELECT 1", "max_rows": 10}),
            serde_json::json!({"max_rows": 5}),
        );
        assert_eq!(merged["sql_query"], "SELECT 1");
        assert_eq!(merged["max_rows"], 5);
    }
}
