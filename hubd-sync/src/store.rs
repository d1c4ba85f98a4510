//! Storage and sink ports the sync stack runs against.
//!
//! Production wires the Postgres catalog and the schema service; tests
//! substitute in-memory fakes behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubd_catalog::model::{
    BasicLibrary, CreateSyncTask, DataInterface, DataSource, ExecStatus, ExecutionKind,
    ExecutionStatus, QualityReport, Rule, SyncTask, SyncTaskExecution, TableField, TaskStatus,
    UpdateSyncTask,
};
use hubd_catalog::{ExecutionUpdate, PgCatalog};
use hubd_core::{HubResult, Page, Pageable, Row};
use hubd_schema::{SchemaOp, SchemaService};

/// Catalog surface the task service and engine need.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, req: CreateSyncTask) -> HubResult<SyncTask>;
    async fn get_task(&self, id: &str) -> HubResult<SyncTask>;
    async fn update_task(&self, id: &str, req: UpdateSyncTask) -> HubResult<SyncTask>;
    async fn delete_task(&self, id: &str) -> HubResult<()>;
    async fn list_tasks(
        &self,
        pageable: &Pageable,
        status: Option<TaskStatus>,
        library_id: Option<&str>,
    ) -> HubResult<Page<SyncTask>>;
    async fn schedulable_tasks(&self) -> HubResult<Vec<SyncTask>>;
    async fn set_status(&self, id: &str, status: TaskStatus) -> HubResult<()>;
    async fn set_execution_status(&self, id: &str, status: ExecutionStatus) -> HubResult<()>;
    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> HubResult<()>;

    async fn insert_execution(
        &self,
        task_id: &str,
        interface_id: &str,
        kind: ExecutionKind,
        status: ExecStatus,
    ) -> HubResult<SyncTaskExecution>;
    async fn update_execution(&self, id: &str, update: ExecutionUpdate) -> HubResult<()>;
    async fn get_execution(&self, id: &str) -> HubResult<SyncTaskExecution>;
    async fn list_executions(
        &self,
        task_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SyncTaskExecution>>;
    async fn latest_executions(&self, task_id: &str, limit: i64)
        -> HubResult<Vec<SyncTaskExecution>>;

    async fn get_interface(&self, id: &str) -> HubResult<DataInterface>;
    async fn get_library(&self, id: &str) -> HubResult<BasicLibrary>;
    async fn get_source(&self, id: &str) -> HubResult<DataSource>;
    async fn rules_for_interface(&self, interface_id: &str) -> HubResult<Vec<Rule>>;
    async fn insert_quality_report(&self, report: &QualityReport) -> HubResult<()>;
}

#[async_trait]
impl TaskStore for PgCatalog {
    async fn create_task(&self, req: CreateSyncTask) -> HubResult<SyncTask> {
        self.create_sync_task(req).await
    }

    async fn get_task(&self, id: &str) -> HubResult<SyncTask> {
        self.get_sync_task(id).await
    }

    async fn update_task(&self, id: &str, req: UpdateSyncTask) -> HubResult<SyncTask> {
        self.update_sync_task(id, req).await
    }

    async fn delete_task(&self, id: &str) -> HubResult<()> {
        self.delete_sync_task(id).await
    }

    async fn list_tasks(
        &self,
        pageable: &Pageable,
        status: Option<TaskStatus>,
        library_id: Option<&str>,
    ) -> HubResult<Page<SyncTask>> {
        self.list_sync_tasks(pageable, status, library_id).await
    }

    async fn schedulable_tasks(&self) -> HubResult<Vec<SyncTask>> {
        self.list_schedulable_tasks().await
    }

    async fn set_status(&self, id: &str, status: TaskStatus) -> HubResult<()> {
        self.set_task_status(id, status).await
    }

    async fn set_execution_status(&self, id: &str, status: ExecutionStatus) -> HubResult<()> {
        self.set_task_execution_status(id, status).await
    }

    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> HubResult<()> {
        self.set_task_next_run(id, at).await
    }

    async fn insert_execution(
        &self,
        task_id: &str,
        interface_id: &str,
        kind: ExecutionKind,
        status: ExecStatus,
    ) -> HubResult<SyncTaskExecution> {
        PgCatalog::insert_execution(self, task_id, interface_id, kind, status).await
    }

    async fn update_execution(&self, id: &str, update: ExecutionUpdate) -> HubResult<()> {
        PgCatalog::update_execution(self, id, update).await
    }

    async fn get_execution(&self, id: &str) -> HubResult<SyncTaskExecution> {
        PgCatalog::get_execution(self, id).await
    }

    async fn list_executions(
        &self,
        task_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SyncTaskExecution>> {
        PgCatalog::list_executions(self, task_id, pageable).await
    }

    async fn latest_executions(
        &self,
        task_id: &str,
        limit: i64,
    ) -> HubResult<Vec<SyncTaskExecution>> {
        self.list_latest_executions(task_id, limit).await
    }

    async fn get_interface(&self, id: &str) -> HubResult<DataInterface> {
        self.get_data_interface(id).await
    }

    async fn get_library(&self, id: &str) -> HubResult<BasicLibrary> {
        self.get_basic_library(id).await
    }

    async fn get_source(&self, id: &str) -> HubResult<DataSource> {
        self.get_data_source(id).await
    }

    async fn rules_for_interface(&self, interface_id: &str) -> HubResult<Vec<Rule>> {
        self.rules_for_object("data_interface", interface_id).await
    }

    async fn insert_quality_report(&self, report: &QualityReport) -> HubResult<()> {
        PgCatalog::insert_quality_report(self, report).await
    }
}

/// Where processed batches land. The write per batch is atomic; batch
/// N+1 is not written before batch N returned.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn ensure_table(
        &self,
        schema: &str,
        table: &str,
        fields: &[TableField],
    ) -> HubResult<()>;
    async fn write_batch(
        &self,
        schema: &str,
        table: &str,
        fields: &[TableField],
        rows: &[Row],
    ) -> HubResult<u64>;
}

#[async_trait]
impl RowSink for SchemaService {
    async fn ensure_table(
        &self,
        schema: &str,
        table: &str,
        fields: &[TableField],
    ) -> HubResult<()> {
        self.manage_table_schema(SchemaOp::Create, schema, table, fields, false)
            .await
    }

    async fn write_batch(
        &self,
        schema: &str,
        table: &str,
        fields: &[TableField],
        rows: &[Row],
    ) -> HubResult<u64> {
        self.upsert_batch(schema, table, fields, rows).await
    }
}
