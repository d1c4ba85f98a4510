//! Behavior tests for the engine + scheduler + task service stack,
//! running against in-memory store/sink fakes and a scripted driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use hubd_catalog::model::*;
use hubd_catalog::ExecutionUpdate;
use hubd_core::{HubError, HubResult, Page, Pageable, Row};
use hubd_drivers::{
    Capability, Driver, DriverManager, DriverSettings, DriverStats, FactoryRegistry, FetchParams,
    HealthProbe, RowStream, SourceLoader,
};
use hubd_events::EventHub;
use hubd_rules::{RuleEngine, RuleEngineConfig};
use hubd_sync::{
    EngineConfig, FireOutcome, RowSink, Scheduler, SyncEngine, SyncTaskService, TaskLauncher,
    TaskStore,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ── In-memory task store ───────────────────────────────────────────────────

#[derive(Default)]
struct MemState {
    tasks: HashMap<String, SyncTask>,
    executions: Vec<SyncTaskExecution>,
    interfaces: HashMap<String, DataInterface>,
    libraries: HashMap<String, BasicLibrary>,
    sources: HashMap<String, DataSource>,
    rules: Vec<Rule>,
    quality_reports: Vec<QualityReport>,
}

#[derive(Default)]
struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    async fn put_library(&self, library: BasicLibrary) {
        self.state
            .lock()
            .await
            .libraries
            .insert(library.id.clone(), library);
    }

    async fn put_source(&self, source: DataSource) {
        self.state
            .lock()
            .await
            .sources
            .insert(source.id.clone(), source);
    }

    async fn put_interface(&self, interface: DataInterface) {
        self.state
            .lock()
            .await
            .interfaces
            .insert(interface.id.clone(), interface);
    }

    async fn execution_statuses(&self, task_id: &str) -> Vec<ExecStatus> {
        self.state
            .lock()
            .await
            .executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.status)
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemStore {
    async fn create_task(&self, req: CreateSyncTask) -> HubResult<SyncTask> {
        req.validate()?;
        let task = SyncTask {
            id: uuid::Uuid::new_v4().to_string(),
            library_type: "basic".into(),
            library_id: req.library_id,
            data_source_id: req.data_source_id,
            interface_ids: req.interface_ids,
            interface_configs: serde_json::json!({}),
            task_type: req.task_type,
            trigger_type: req.trigger_type,
            cron_expression: req.cron_expression,
            interval_seconds: req.interval_seconds,
            scheduled_time: req.scheduled_time,
            status: TaskStatus::Draft,
            execution_status: ExecutionStatus::Idle,
            config: req.config,
            created_by: "tester".into(),
            created_at: Utc::now(),
            next_run_at: None,
        };
        self.state
            .lock()
            .await
            .tasks
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> HubResult<SyncTask> {
        self.state
            .lock()
            .await
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("sync task {id}")))
    }

    async fn update_task(&self, id: &str, req: UpdateSyncTask) -> HubResult<SyncTask> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| HubError::NotFound(format!("sync task {id}")))?;
        if let Some(ids) = req.interface_ids {
            task.interface_ids = ids;
        }
        if let Some(trigger) = req.trigger_type {
            task.trigger_type = trigger;
        }
        if let Some(cron) = req.cron_expression {
            task.cron_expression = cron;
        }
        if let Some(interval) = req.interval_seconds {
            task.interval_seconds = interval;
        }
        if let Some(at) = req.scheduled_time {
            task.scheduled_time = at;
        }
        if let Some(config) = req.config {
            task.config = config;
        }
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &str) -> HubResult<()> {
        let mut state = self.state.lock().await;
        state
            .tasks
            .remove(id)
            .ok_or_else(|| HubError::NotFound(format!("sync task {id}")))?;
        state.executions.retain(|e| e.task_id != id);
        Ok(())
    }

    async fn list_tasks(
        &self,
        pageable: &Pageable,
        status: Option<TaskStatus>,
        _library_id: Option<&str>,
    ) -> HubResult<Page<SyncTask>> {
        let state = self.state.lock().await;
        let rows: Vec<SyncTask> = state
            .tasks
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        let total = rows.len() as u64;
        Ok(Page::new(rows, pageable, total))
    }

    async fn schedulable_tasks(&self) -> HubResult<Vec<SyncTask>> {
        Ok(self
            .state
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Active && t.trigger_type != TriggerType::Manual)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: &str, status: TaskStatus) -> HubResult<()> {
        if let Some(task) = self.state.lock().await.tasks.get_mut(id) {
            task.status = status;
        }
        Ok(())
    }

    async fn set_execution_status(&self, id: &str, status: ExecutionStatus) -> HubResult<()> {
        if let Some(task) = self.state.lock().await.tasks.get_mut(id) {
            task.execution_status = status;
        }
        Ok(())
    }

    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> HubResult<()> {
        if let Some(task) = self.state.lock().await.tasks.get_mut(id) {
            task.next_run_at = at;
        }
        Ok(())
    }

    async fn insert_execution(
        &self,
        task_id: &str,
        interface_id: &str,
        kind: ExecutionKind,
        status: ExecStatus,
    ) -> HubResult<SyncTaskExecution> {
        let exec = SyncTaskExecution {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            interface_id: interface_id.into(),
            execution_type: kind,
            status,
            start_time: Utc::now(),
            end_time: None,
            record_count: None,
            error_message: None,
            progress: None,
        };
        self.state.lock().await.executions.push(exec.clone());
        Ok(exec)
    }

    async fn update_execution(&self, id: &str, update: ExecutionUpdate) -> HubResult<()> {
        let mut state = self.state.lock().await;
        let exec = state
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| HubError::NotFound(format!("execution {id}")))?;
        if let Some(status) = update.status {
            exec.status = status;
        }
        if update.end_time.is_some() {
            exec.end_time = update.end_time;
        }
        if update.record_count.is_some() {
            exec.record_count = update.record_count;
        }
        if update.error_message.is_some() {
            exec.error_message = update.error_message;
        }
        if let Some(progress) = update.progress {
            exec.progress = Some(serde_json::to_value(progress)?);
        }
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> HubResult<SyncTaskExecution> {
        self.state
            .lock()
            .await
            .executions
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("execution {id}")))
    }

    async fn list_executions(
        &self,
        task_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SyncTaskExecution>> {
        let state = self.state.lock().await;
        let rows: Vec<SyncTaskExecution> = state
            .executions
            .iter()
            .rev()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        let total = rows.len() as u64;
        Ok(Page::new(rows, pageable, total))
    }

    async fn latest_executions(
        &self,
        task_id: &str,
        limit: i64,
    ) -> HubResult<Vec<SyncTaskExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .iter()
            .rev()
            .filter(|e| e.task_id == task_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_interface(&self, id: &str) -> HubResult<DataInterface> {
        self.state
            .lock()
            .await
            .interfaces
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("data interface {id}")))
    }

    async fn get_library(&self, id: &str) -> HubResult<BasicLibrary> {
        self.state
            .lock()
            .await
            .libraries
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("basic library {id}")))
    }

    async fn get_source(&self, id: &str) -> HubResult<DataSource> {
        self.state
            .lock()
            .await
            .sources
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("data source {id}")))
    }

    async fn rules_for_interface(&self, _interface_id: &str) -> HubResult<Vec<Rule>> {
        Ok(self.state.lock().await.rules.clone())
    }

    async fn insert_quality_report(&self, report: &QualityReport) -> HubResult<()> {
        self.state.lock().await.quality_reports.push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl SourceLoader for MemStore {
    async fn load_source(&self, id: &str) -> HubResult<DataSource> {
        self.get_source(id).await
    }

    async fn resident_sources(&self) -> HubResult<Vec<DataSource>> {
        Ok(Vec::new())
    }
}

// ── Scripted driver and sink ───────────────────────────────────────────────

struct ScriptedDriver {
    source_id: String,
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Fetch)
    }

    async fn health_check(&self) -> HealthProbe {
        HealthProbe::up(0)
    }

    async fn fetch(&self, params: FetchParams, cancel: CancellationToken) -> HubResult<RowStream> {
        let rows = params.u64_param("rows").unwrap_or(0);
        let delay = Duration::from_millis(params.u64_param("delay_ms").unwrap_or(0));
        if params.str_param("fail_at_start").is_some() {
            return Err(HubError::driver("scripted start failure"));
        }
        let fail_at = params.u64_param("fail_at_row");
        let (tx, rx) = tokio::sync::mpsc::channel::<HubResult<Row>>(8);
        tokio::spawn(async move {
            for i in 0..rows {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if fail_at == Some(i) {
                    let _ = tx.send(Err(HubError::driver("scripted mid-stream failure"))).await;
                    return;
                }
                let mut row = Row::new();
                row.insert("id".into(), serde_json::json!(i));
                row.insert("v".into(), serde_json::json!(format!("row-{i}")));
                if tx.send(Ok(row)).await.is_err() {
                    return;
                }
            }
        });
        Ok(tokio_stream::wrappers::ReceiverStream::new(rx).boxed())
    }

    fn stats(&self) -> DriverStats {
        DriverStats::default()
    }
}

#[derive(Default)]
struct MemSink {
    written: AtomicU64,
    fail_tables: std::sync::Mutex<Vec<String>>,
    tables: std::sync::Mutex<HashMap<String, Vec<Row>>>,
}

impl MemSink {
    fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    fn fail_table(&self, table: &str) {
        self.fail_tables.lock().unwrap().push(table.to_string());
    }

    fn rows_in(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RowSink for MemSink {
    async fn ensure_table(
        &self,
        _schema: &str,
        _table: &str,
        _fields: &[TableField],
    ) -> HubResult<()> {
        Ok(())
    }

    async fn write_batch(
        &self,
        _schema: &str,
        table: &str,
        _fields: &[TableField],
        rows: &[Row],
    ) -> HubResult<u64> {
        if self.fail_tables.lock().unwrap().iter().any(|t| t == table) {
            return Err(HubError::internal("sink write refused"));
        }
        self.written.fetch_add(rows.len() as u64, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<MemStore>,
    sink: Arc<MemSink>,
    service: Arc<SyncTaskService>,
    engine: Arc<SyncEngine>,
}

async fn harness() -> Harness {
    harness_with(EngineConfig {
        queue_capacity: 64,
        workers: 2,
        batch_size: 10,
        progress_interval: Duration::from_millis(50),
    })
    .await
}

async fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemStore::default());
    let sink = Arc::new(MemSink::default());
    let mut registry = FactoryRegistry::empty();
    registry.register(
        SourceCategory::Db,
        "scripted",
        Arc::new(|source, _| {
            Ok(Arc::new(ScriptedDriver {
                source_id: source.id.clone(),
            }) as Arc<dyn Driver>)
        }),
    );
    let drivers = Arc::new(DriverManager::new(
        store.clone(),
        registry,
        DriverSettings::default(),
    ));
    let rules = Arc::new(RuleEngine::new(RuleEngineConfig::default()));
    let (engine, outcomes) = SyncEngine::new(config, drivers, rules, sink.clone(), store.clone());
    engine.start().await;
    let scheduler = Scheduler::new(Duration::from_millis(50));
    let events = Arc::new(EventHub::new(16, None));
    let service = SyncTaskService::new(store.clone(), engine.clone(), scheduler, events);
    service.start_aggregator(outcomes);
    Harness {
        store,
        sink,
        service,
        engine,
    }
}

fn fields() -> Vec<TableField> {
    vec![
        TableField {
            name_en: "id".into(),
            data_type: "bigint".into(),
            is_nullable: false,
            default: None,
            is_primary_key: true,
            comment: None,
        },
        TableField {
            name_en: "v".into(),
            data_type: "text".into(),
            is_nullable: true,
            default: None,
            is_primary_key: false,
            comment: None,
        },
    ]
}

impl Harness {
    async fn seed(&self, interfaces: &[&str]) {
        self.store
            .put_library(BasicLibrary {
                id: "lib1".into(),
                name_zh: "运营".into(),
                name_en: "ops".into(),
                status: ResourceStatus::Active,
                created_at: Utc::now(),
            })
            .await;
        self.store
            .put_source(DataSource {
                id: "src1".into(),
                library_id: "lib1".into(),
                name: "orders db".into(),
                category: SourceCategory::Db,
                source_type: "scripted".into(),
                connection_config: serde_json::json!({}),
                params_config: serde_json::json!({}),
                script: None,
                script_enabled: false,
                status: ResourceStatus::Active,
                is_resident: false,
                created_at: Utc::now(),
            })
            .await;
        for name in interfaces {
            self.store
                .put_interface(DataInterface {
                    id: format!("iface-{name}"),
                    library_id: "lib1".into(),
                    data_source_id: "src1".into(),
                    name_zh: name.to_string(),
                    name_en: name.to_string(),
                    kind: InterfaceKind::Batch,
                    interface_config: serde_json::json!({}),
                    parse_config: serde_json::json!({}),
                    table_fields: sqlx::types::Json(fields()),
                    status: ResourceStatus::Active,
                    created_at: Utc::now(),
                })
                .await;
        }
    }

    async fn create_task(&self, interfaces: &[&str], config: serde_json::Value) -> SyncTask {
        self.service
            .create(CreateSyncTask {
                library_id: "lib1".into(),
                data_source_id: "src1".into(),
                interface_ids: interfaces.iter().map(|i| format!("iface-{i}")).collect(),
                interface_configs: serde_json::json!({}),
                task_type: TaskType::BatchSync,
                trigger_type: TriggerType::Manual,
                cron_expression: None,
                interval_seconds: None,
                scheduled_time: None,
                config,
                created_by: "tester".into(),
            })
            .await
            .unwrap()
    }

    async fn wait_exec_status(&self, task_id: &str, wanted: ExecutionStatus) {
        for _ in 0..200 {
            let task = self.store.get_task(task_id).await.unwrap();
            if task.execution_status == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {task_id} never reached {wanted}");
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pull_happy_path_writes_all_rows() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let task = h
        .create_task(&["orders"], serde_json::json!({"rows": 37}))
        .await;

    h.service.activate(&task.id).await.unwrap();
    let executions = h.service.start(&task.id).await.unwrap();
    assert_eq!(executions.len(), 1);

    h.wait_exec_status(&task.id, ExecutionStatus::Success).await;
    assert_eq!(h.sink.written(), 37);
    assert_eq!(h.sink.rows_in("orders"), 37);

    let exec = h.store.get_execution(&executions[0].id).await.unwrap();
    assert_eq!(exec.status, ExecStatus::Success);
    assert_eq!(exec.record_count, Some(37));
    assert!(exec.end_time.is_some());
}

#[tokio::test]
async fn cancellation_stops_at_batch_boundary() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    // 10ms per row: plenty of time to cancel mid-flight.
    let task = h
        .create_task(
            &["orders"],
            serde_json::json!({"rows": 100_000, "delay_ms": 10}),
        )
        .await;
    h.service.activate(&task.id).await.unwrap();
    let executions = h.service.start(&task.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let cancelled = h.service.stop(&task.id).await.unwrap();
    assert_eq!(cancelled, 1);

    h.wait_exec_status(&task.id, ExecutionStatus::Idle).await;
    let exec = h.store.get_execution(&executions[0].id).await.unwrap();
    assert_eq!(exec.status, ExecStatus::Cancelled);
    let written_at_cancel = h.sink.written();
    assert_eq!(exec.record_count, Some(written_at_cancel as i64));

    // Nothing trickles in afterwards.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.sink.written(), written_at_cancel);
}

#[tokio::test]
async fn lifecycle_guards_reject_invalid_transitions() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let task = h.create_task(&["orders"], serde_json::json!({"rows": 1})).await;

    // Draft tasks cannot pause, start or stop.
    assert_eq!(
        h.service.pause(&task.id).await.unwrap_err().business_status(),
        409
    );
    assert_eq!(
        h.service.start(&task.id).await.unwrap_err().business_status(),
        409
    );

    // Activate -> pause -> activate round-trips the configuration.
    let before = h.service.activate(&task.id).await.unwrap();
    h.service.pause(&task.id).await.unwrap();
    let after = h.service.activate(&task.id).await.unwrap();
    assert_eq!(before.config, after.config);
    assert_eq!(before.interface_ids, after.interface_ids);
    assert_eq!(before.trigger_type, after.trigger_type);

    // Double activate conflicts.
    assert_eq!(
        h.service
            .activate(&task.id)
            .await
            .unwrap_err()
            .business_status(),
        409
    );
}

#[tokio::test]
async fn delete_refused_while_running() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let task = h
        .create_task(
            &["orders"],
            serde_json::json!({"rows": 10_000, "delay_ms": 10}),
        )
        .await;
    h.service.activate(&task.id).await.unwrap();
    h.service.start(&task.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        h.service.delete(&task.id).await.unwrap_err().business_status(),
        409
    );
    h.service.stop(&task.id).await.unwrap();
    h.wait_exec_status(&task.id, ExecutionStatus::Idle).await;
    h.service.delete(&task.id).await.unwrap();
    assert!(h.store.get_task(&task.id).await.is_err());
}

#[tokio::test]
async fn fan_out_aggregates_and_retry_reruns_only_failures() {
    let h = harness().await;
    h.seed(&["alpha", "beta"]).await;
    h.sink.fail_table("beta");
    let task = h
        .create_task(&["alpha", "beta"], serde_json::json!({"rows": 5}))
        .await;
    h.service.activate(&task.id).await.unwrap();
    let executions = h.service.start(&task.id).await.unwrap();
    assert_eq!(executions.len(), 2);

    h.wait_exec_status(&task.id, ExecutionStatus::Failed).await;
    assert_eq!(h.sink.rows_in("alpha"), 5);
    assert_eq!(h.sink.rows_in("beta"), 0);

    // Heal the sink and retry: only beta is re-executed.
    h.sink.fail_tables.lock().unwrap().clear();
    let retried = h.service.retry(&task.id).await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].interface_id, "iface-beta");
    assert_eq!(retried[0].execution_type, ExecutionKind::Retry);

    h.wait_exec_status(&task.id, ExecutionStatus::Success).await;
    assert_eq!(h.sink.rows_in("beta"), 5);
    // Alpha was not written twice.
    assert_eq!(h.sink.rows_in("alpha"), 5);
}

#[tokio::test]
async fn scheduled_fire_skips_while_previous_runs() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let task = h
        .store
        .create_task(CreateSyncTask {
            library_id: "lib1".into(),
            data_source_id: "src1".into(),
            interface_ids: vec!["iface-orders".into()],
            interface_configs: serde_json::json!({}),
            task_type: TaskType::BatchSync,
            trigger_type: TriggerType::Interval,
            cron_expression: None,
            interval_seconds: Some(1),
            scheduled_time: None,
            config: serde_json::json!({"rows": 10_000, "delay_ms": 5}),
            created_by: "tester".into(),
        })
        .await
        .unwrap();
    h.service.activate(&task.id).await.unwrap();

    let launcher: Arc<dyn TaskLauncher> = h.service.clone();
    assert_eq!(launcher.fire(&task.id).await.unwrap(), FireOutcome::Started);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.fire(&task.id).await.unwrap(), FireOutcome::Skipped);
    assert_eq!(launcher.fire(&task.id).await.unwrap(), FireOutcome::Skipped);

    let statuses = h.store.execution_statuses(&task.id).await;
    let started = statuses.iter().filter(|s| **s == ExecStatus::Running).count();
    let skipped = statuses.iter().filter(|s| **s == ExecStatus::Skipped).count();
    assert_eq!(started, 1);
    assert_eq!(skipped, 2);

    h.service.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn full_queue_fails_fast_with_busy() {
    let h = harness_with(EngineConfig {
        queue_capacity: 1,
        workers: 1,
        batch_size: 10,
        progress_interval: Duration::from_millis(50),
    })
    .await;
    h.seed(&["a", "b", "c", "d"]).await;
    // Long-running tasks occupy the worker and then the queue slot.
    let blocker = h
        .create_task(&["a"], serde_json::json!({"rows": 100_000, "delay_ms": 10}))
        .await;
    h.service.activate(&blocker.id).await.unwrap();
    h.service.start(&blocker.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let queued = h
        .create_task(&["b"], serde_json::json!({"rows": 1}))
        .await;
    h.service.activate(&queued.id).await.unwrap();
    h.service.start(&queued.id).await.unwrap();

    let refused = h
        .create_task(&["c"], serde_json::json!({"rows": 1}))
        .await;
    h.service.activate(&refused.id).await.unwrap();
    let err = h.service.start(&refused.id).await.unwrap_err();
    assert_eq!(err.business_status(), 503);

    h.engine.shutdown();
}

#[tokio::test]
async fn driver_failure_marks_execution_failed() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let task = h
        .create_task(
            &["orders"],
            serde_json::json!({"rows": 50, "fail_at_row": 25}),
        )
        .await;
    h.service.activate(&task.id).await.unwrap();
    let executions = h.service.start(&task.id).await.unwrap();

    h.wait_exec_status(&task.id, ExecutionStatus::Failed).await;
    let exec = h.store.get_execution(&executions[0].id).await.unwrap();
    assert_eq!(exec.status, ExecStatus::Failed);
    assert!(exec
        .error_message
        .as_deref()
        .unwrap()
        .contains("mid-stream"));
}

#[tokio::test]
async fn quality_rules_produce_a_report() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    h.store.state.lock().await.rules.push(Rule {
        id: "r1".into(),
        name: "amount in range".into(),
        kind: RuleKind::Quality,
        rule_type: "range".into(),
        logic: serde_json::json!({"field": "id", "min": 5}),
        parameters: serde_json::json!({}),
        is_builtin: false,
        is_enabled: true,
        version: 1,
        object_type: Some("data_interface".into()),
        object_id: Some("iface-orders".into()),
        created_at: Utc::now(),
    });
    // Rows 0..9: half fall below the configured minimum.
    let task = h.create_task(&["orders"], serde_json::json!({"rows": 10})).await;
    h.service.activate(&task.id).await.unwrap();
    h.service.start(&task.id).await.unwrap();
    h.wait_exec_status(&task.id, ExecutionStatus::Success).await;

    let reports = h.store.state.lock().await.quality_reports.clone();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.object_id, "iface-orders");
    assert!((report.quality_score - 0.5).abs() < 1e-9);
    assert_eq!(report.metrics["accuracy"], 0.5);
    assert_eq!(report.issues.as_array().unwrap().len(), 5);
    assert!(!report.recommendations.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn engine_statistics_track_outcomes() {
    let h = harness().await;
    h.seed(&["orders"]).await;
    let ok = h.create_task(&["orders"], serde_json::json!({"rows": 3})).await;
    h.service.activate(&ok.id).await.unwrap();
    h.service.start(&ok.id).await.unwrap();
    h.wait_exec_status(&ok.id, ExecutionStatus::Success).await;

    let bad = h
        .create_task(&["orders"], serde_json::json!({"fail_at_start": "yes"}))
        .await;
    h.service.activate(&bad.id).await.unwrap();
    h.service.start(&bad.id).await.unwrap();
    h.wait_exec_status(&bad.id, ExecutionStatus::Failed).await;

    let stats = h.service.engine_stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.in_flight, 0);
}
