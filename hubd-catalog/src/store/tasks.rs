use chrono::{DateTime, Utc};
use hubd_core::{ids, HubError, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::{
    validate_trigger, CreateSyncTask, ExecStatus, ExecutionKind, ExecutionStatus, SyncTask,
    SyncTaskExecution, TaskProgress, TaskStatus, UpdateSyncTask,
};

const TASK_COLUMNS: &str = "id, library_type, library_id, data_source_id, interface_ids, \
     interface_configs, task_type, trigger_type, cron_expression, interval_seconds, \
     scheduled_time, status, execution_status, config, created_by, created_at, next_run_at";

const EXEC_COLUMNS: &str = "id, task_id, interface_id, execution_type, status, start_time, \
     end_time, record_count, error_message, progress";

/// Partial update applied to a running execution row.
#[derive(Debug, Default)]
pub struct ExecutionUpdate {
    pub status: Option<ExecStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub record_count: Option<i64>,
    pub error_message: Option<String>,
    pub progress: Option<TaskProgress>,
}

impl PgCatalog {
    pub async fn create_sync_task(&self, req: CreateSyncTask) -> HubResult<SyncTask> {
        req.validate()?;
        for interface_id in &req.interface_ids {
            self.get_data_interface(interface_id).await?;
        }
        let task = SyncTask {
            id: ids::new_id(),
            library_type: "basic".into(),
            library_id: req.library_id,
            data_source_id: req.data_source_id,
            interface_ids: req.interface_ids,
            interface_configs: if req.interface_configs.is_null() {
                serde_json::json!({})
            } else {
                req.interface_configs
            },
            task_type: req.task_type,
            trigger_type: req.trigger_type,
            cron_expression: req.cron_expression,
            interval_seconds: req.interval_seconds,
            scheduled_time: req.scheduled_time,
            status: TaskStatus::Draft,
            execution_status: ExecutionStatus::Idle,
            config: if req.config.is_null() {
                serde_json::json!({})
            } else {
                req.config
            },
            created_by: if req.created_by.is_empty() {
                "system".into()
            } else {
                req.created_by
            },
            created_at: ids::now(),
            next_run_at: None,
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.sync_tasks ({TASK_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(&task.id)
        .bind(&task.library_type)
        .bind(&task.library_id)
        .bind(&task.data_source_id)
        .bind(&task.interface_ids)
        .bind(&task.interface_configs)
        .bind(task.task_type.as_str())
        .bind(task.trigger_type.as_str())
        .bind(&task.cron_expression)
        .bind(task.interval_seconds)
        .bind(task.scheduled_time)
        .bind(task.status.as_str())
        .bind(task.execution_status.as_str())
        .bind(&task.config)
        .bind(&task.created_by)
        .bind(task.created_at)
        .bind(task.next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    pub async fn get_sync_task(&self, id: &str) -> HubResult<SyncTask> {
        sqlx::query_as::<_, SyncTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM hub_meta.sync_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("sync task {id}")))
    }

    /// Merge-write partial update. Lifecycle guards live in the task
    /// service; the store revalidates the merged trigger shape.
    pub async fn update_sync_task(&self, id: &str, req: UpdateSyncTask) -> HubResult<SyncTask> {
        let existing = self.get_sync_task(id).await?;
        let interface_ids = req.interface_ids.unwrap_or(existing.interface_ids);
        if interface_ids.is_empty() {
            return Err(HubError::invalid_input(
                "interface_ids",
                "at least one interface required",
            ));
        }
        let trigger_type = req.trigger_type.unwrap_or(existing.trigger_type);
        let cron_expression = req.cron_expression.unwrap_or(existing.cron_expression);
        let interval_seconds = req.interval_seconds.unwrap_or(existing.interval_seconds);
        let scheduled_time = req.scheduled_time.unwrap_or(existing.scheduled_time);
        validate_trigger(
            trigger_type,
            cron_expression.as_deref(),
            interval_seconds,
            scheduled_time,
        )?;
        sqlx::query(
            "UPDATE hub_meta.sync_tasks SET interface_ids = $1, interface_configs = $2, \
             trigger_type = $3, cron_expression = $4, interval_seconds = $5, \
             scheduled_time = $6, config = $7 WHERE id = $8",
        )
        .bind(&interface_ids)
        .bind(req.interface_configs.unwrap_or(existing.interface_configs))
        .bind(trigger_type.as_str())
        .bind(&cron_expression)
        .bind(interval_seconds)
        .bind(scheduled_time)
        .bind(req.config.unwrap_or(existing.config))
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_sync_task(id).await
    }

    /// Executions cascade with the task row.
    pub async fn delete_sync_task(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.sync_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("sync task {id}")));
        }
        Ok(())
    }

    pub async fn list_sync_tasks(
        &self,
        pageable: &Pageable,
        status: Option<TaskStatus>,
        library_id: Option<&str>,
    ) -> HubResult<Page<SyncTask>> {
        let mut count =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.sync_tasks WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM hub_meta.sync_tasks WHERE 1=1"
        ));
        for builder in [&mut count, &mut select] {
            if let Some(status) = status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(lib) = library_id {
                builder.push(" AND library_id = ").push_bind(lib.to_string());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<SyncTask>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    /// Active tasks with a schedulable trigger, for scheduler bootstrap.
    pub async fn list_schedulable_tasks(&self) -> HubResult<Vec<SyncTask>> {
        Ok(sqlx::query_as::<_, SyncTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM hub_meta.sync_tasks \
             WHERE status = 'active' AND trigger_type <> 'manual' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn set_task_status(&self, id: &str, status: TaskStatus) -> HubResult<()> {
        sqlx::query("UPDATE hub_meta.sync_tasks SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_task_execution_status(
        &self,
        id: &str,
        status: ExecutionStatus,
    ) -> HubResult<()> {
        sqlx::query("UPDATE hub_meta.sync_tasks SET execution_status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_task_next_run(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> HubResult<()> {
        sqlx::query("UPDATE hub_meta.sync_tasks SET next_run_at = $1 WHERE id = $2")
            .bind(next_run_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Executions ────────────────────────────────────────────────────────

    pub async fn insert_execution(
        &self,
        task_id: &str,
        interface_id: &str,
        execution_type: ExecutionKind,
        status: ExecStatus,
    ) -> HubResult<SyncTaskExecution> {
        let exec = SyncTaskExecution {
            id: ids::new_id(),
            task_id: task_id.into(),
            interface_id: interface_id.into(),
            execution_type,
            status,
            start_time: ids::now(),
            end_time: None,
            record_count: None,
            error_message: None,
            progress: None,
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.sync_task_executions ({EXEC_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(&exec.id)
        .bind(&exec.task_id)
        .bind(&exec.interface_id)
        .bind(exec.execution_type.as_str())
        .bind(exec.status.as_str())
        .bind(exec.start_time)
        .bind(exec.end_time)
        .bind(exec.record_count)
        .bind(&exec.error_message)
        .bind(&exec.progress)
        .execute(&self.pool)
        .await?;
        Ok(exec)
    }

    pub async fn get_execution(&self, id: &str) -> HubResult<SyncTaskExecution> {
        sqlx::query_as::<_, SyncTaskExecution>(&format!(
            "SELECT {EXEC_COLUMNS} FROM hub_meta.sync_task_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("execution {id}")))
    }

    pub async fn update_execution(&self, id: &str, update: ExecutionUpdate) -> HubResult<()> {
        let existing = self.get_execution(id).await?;
        let progress = match update.progress {
            Some(p) => Some(serde_json::to_value(p)?),
            None => existing.progress,
        };
        sqlx::query(
            "UPDATE hub_meta.sync_task_executions SET status = $1, end_time = $2, \
             record_count = $3, error_message = $4, progress = $5 WHERE id = $6",
        )
        .bind(update.status.unwrap_or(existing.status).as_str())
        .bind(update.end_time.or(existing.end_time))
        .bind(update.record_count.or(existing.record_count))
        .bind(update.error_message.or(existing.error_message))
        .bind(progress)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_executions(
        &self,
        task_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SyncTaskExecution>> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM hub_meta.sync_task_executions WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        let rows = sqlx::query_as::<_, SyncTaskExecution>(&format!(
            "SELECT {EXEC_COLUMNS} FROM hub_meta.sync_task_executions \
             WHERE task_id = $1 ORDER BY start_time DESC LIMIT $2 OFFSET $3"
        ))
        .bind(task_id)
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    pub async fn list_running_executions(&self, task_id: &str) -> HubResult<Vec<SyncTaskExecution>> {
        Ok(sqlx::query_as::<_, SyncTaskExecution>(&format!(
            "SELECT {EXEC_COLUMNS} FROM hub_meta.sync_task_executions \
             WHERE task_id = $1 AND status = 'running' ORDER BY start_time"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Latest execution per status aggregation; cheap because of the
    /// (task_id, start_time) index.
    pub async fn list_latest_executions(
        &self,
        task_id: &str,
        limit: i64,
    ) -> HubResult<Vec<SyncTaskExecution>> {
        Ok(sqlx::query_as::<_, SyncTaskExecution>(&format!(
            "SELECT {EXEC_COLUMNS} FROM hub_meta.sync_task_executions \
             WHERE task_id = $1 ORDER BY start_time DESC LIMIT $2"
        ))
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Explicit retention cleanup; execution history is otherwise kept.
    pub async fn cleanup_executions(&self, before: DateTime<Utc>) -> HubResult<u64> {
        let result =
            sqlx::query("DELETE FROM hub_meta.sync_task_executions WHERE start_time < $1")
                .bind(before)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
