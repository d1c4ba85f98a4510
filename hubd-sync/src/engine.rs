//! Sync task engine: bounded submit queue, worker pool, batch pipeline.
//!
//! A worker takes one request, obtains the driver, iterates the row
//! sequence in fixed-size batches through the rule engine into the sink,
//! and keeps the execution row's progress snapshot fresh. Cancellation
//! is honored at batch boundaries. The engine never retries a whole
//! execution; the task service orchestrates retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use hubd_catalog::model::{ExecStatus, QualityReport, TableField, TaskProgress};
use hubd_catalog::ExecutionUpdate;
use hubd_core::{HubError, HubResult, Row};
use hubd_drivers::{Capability, Driver, DriverManager, FetchParams};
use hubd_rules::{BatchOutcome, RuleEngine, RuleSet};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::store::{RowSink, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Pull a finite row stream from the driver.
    Pull,
    /// Drain the driver's staged push/stream buffer.
    Drain,
}

/// One unit of work: a single execution against a single interface.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub execution_id: String,
    pub task_id: String,
    pub interface_id: String,
    pub data_source_id: String,
    pub schema: String,
    pub table: String,
    pub fields: Vec<TableField>,
    /// Source params overlaid with task and per-interface config.
    pub config: serde_json::Value,
    pub mode: SyncMode,
}

/// Completion notice consumed by the task service aggregator.
#[derive(Debug, Clone)]
pub struct OutcomeNotice {
    pub task_id: String,
    pub execution_id: String,
    pub interface_id: String,
    pub status: ExecStatus,
    pub record_count: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub submitted: u64,
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub average_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4),
            batch_size: 500,
            progress_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    completed: AtomicU64,
    total_duration_ms: AtomicU64,
}

pub struct SyncEngine {
    config: EngineConfig,
    drivers: Arc<DriverManager>,
    rules: Arc<RuleEngine>,
    sink: Arc<dyn RowSink>,
    store: Arc<dyn TaskStore>,
    queue_tx: mpsc::Sender<SyncRequest>,
    queue_rx: Mutex<Option<mpsc::Receiver<SyncRequest>>>,
    outcome_tx: mpsc::UnboundedSender<OutcomeNotice>,
    /// `execution_id -> (task_id, cancel token)` for live executions.
    cancels: DashMap<String, (String, CancellationToken)>,
    shutdown: CancellationToken,
    counters: Counters,
}

impl SyncEngine {
    /// Returns the engine and the outcome receiver the task service
    /// aggregates from.
    pub fn new(
        config: EngineConfig,
        drivers: Arc<DriverManager>,
        rules: Arc<RuleEngine>,
        sink: Arc<dyn RowSink>,
        store: Arc<dyn TaskStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutcomeNotice>) {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            config,
            drivers,
            rules,
            sink,
            store,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            outcome_tx,
            cancels: DashMap::new(),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
        });
        (engine, outcome_rx)
    }

    /// Spawn the worker pool. Call once at startup.
    pub async fn start(self: &Arc<Self>) {
        let receiver = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("engine started twice");
        let receiver = Arc::new(Mutex::new(receiver));
        for worker_id in 0..self.config.workers.max(1) {
            let engine = self.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let request = {
                        let mut guard = receiver.lock().await;
                        tokio::select! {
                            _ = engine.shutdown.cancelled() => None,
                            request = guard.recv() => request,
                        }
                    };
                    let Some(request) = request else { break };
                    engine.run_one(request).await;
                }
                tracing::debug!(worker = worker_id, "sync worker stopped");
            });
        }
        tracing::info!(workers = self.config.workers.max(1), "sync engine started");
    }

    /// Admit a request; fails fast with `ErrBusy` when the queue is full.
    pub fn submit(&self, request: SyncRequest) -> HubResult<()> {
        match self.queue_tx.try_send(request) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(HubError::Busy("sync submit queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HubError::Busy("sync engine stopped".into()))
            }
        }
    }

    /// Request cancellation of one execution.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.cancels.get(execution_id) {
            Some(entry) => {
                entry.value().1.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every live execution of a task.
    pub fn cancel_task(&self, task_id: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.cancels.iter() {
            if entry.value().0 == task_id {
                entry.value().1.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// True while any execution of the task is in a worker.
    pub fn is_task_running(&self, task_id: &str) -> bool {
        self.cancels.iter().any(|entry| entry.value().0 == task_id)
    }

    /// Wait until the task has no live execution, up to `timeout`.
    pub async fn wait_task_idle(&self, task_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_task_running(task_id) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    pub fn statistics(&self) -> EngineStats {
        let completed = self.counters.completed.load(Ordering::Relaxed);
        EngineStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            average_duration_ms: if completed == 0 {
                0
            } else {
                self.counters.total_duration_ms.load(Ordering::Relaxed) / completed
            },
        }
    }

    /// Cancel everything and stop accepting work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.cancels.iter() {
            entry.value().1.cancel();
        }
    }

    async fn run_one(self: &Arc<Self>, request: SyncRequest) {
        let cancel = self.shutdown.child_token();
        self.cancels.insert(
            request.execution_id.clone(),
            (request.task_id.clone(), cancel.clone()),
        );
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let started = tokio::time::Instant::now();

        let result = self.pipeline(&request, &cancel).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_duration_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
        self.cancels.remove(&request.execution_id);
        self.rules.clear_scope(&request.task_id, &request.interface_id);

        let (status, records, error) = match result {
            Ok(records) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                (ExecStatus::Success, records, None)
            }
            Err((records, HubError::Cancelled)) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                (ExecStatus::Cancelled, records, None)
            }
            Err((records, e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                (ExecStatus::Failed, records, Some(e.to_string()))
            }
        };
        tracing::info!(
            task = %request.task_id,
            execution = %request.execution_id,
            status = %status,
            records,
            elapsed_ms,
            "execution finished"
        );

        if let Err(e) = self
            .store
            .update_execution(
                &request.execution_id,
                ExecutionUpdate {
                    status: Some(status),
                    end_time: Some(Utc::now()),
                    record_count: Some(records as i64),
                    error_message: error.clone(),
                    progress: None,
                },
            )
            .await
        {
            tracing::warn!(execution = %request.execution_id, error = %e, "execution update failed");
        }

        let _ = self.outcome_tx.send(OutcomeNotice {
            task_id: request.task_id,
            execution_id: request.execution_id,
            interface_id: request.interface_id,
            status,
            record_count: records,
            error,
        });
    }

    /// Source -> rules -> storage. Returns rows written, or the rows
    /// written so far paired with the terminating error.
    async fn pipeline(
        &self,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<u64, (u64, HubError)> {
        let fail = |e: HubError| (0u64, e);

        let driver = self
            .drivers
            .get_or_create(&request.data_source_id)
            .await
            .map_err(fail)?;
        let rules = RuleSet::partition(
            self.store
                .rules_for_interface(&request.interface_id)
                .await
                .map_err(fail)?,
        );
        self.sink
            .ensure_table(&request.schema, &request.table, &request.fields)
            .await
            .map_err(fail)?;

        let mut progress = ProgressTracker::new(
            self.store.clone(),
            request.execution_id.clone(),
            self.config.progress_interval,
        );
        let mut quality = QualityAccumulator::default();

        let mut written = 0u64;
        match request.mode {
            SyncMode::Pull => {
                let mut stream = driver
                    .fetch(
                        FetchParams::new(request.config.clone()),
                        cancel.child_token(),
                    )
                    .await
                    .map_err(fail)?;
                let mut batch: Vec<Row> = Vec::with_capacity(self.config.batch_size);
                loop {
                    if cancel.is_cancelled() {
                        return Err((written, HubError::Cancelled));
                    }
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return Err((written, HubError::Cancelled)),
                        item = stream.next() => item,
                    };
                    match next {
                        Some(Ok(row)) => {
                            batch.push(row);
                            if batch.len() >= self.config.batch_size {
                                written += self
                                    .flush(
                                        request,
                                        &rules,
                                        std::mem::take(&mut batch),
                                        &mut progress,
                                        &mut quality,
                                    )
                                    .await
                                    .map_err(|e| (written, e))?;
                            }
                        }
                        Some(Err(e)) => return Err((written, e)),
                        None => break,
                    }
                }
                if !batch.is_empty() {
                    written += self
                        .flush(request, &rules, batch, &mut progress, &mut quality)
                        .await
                        .map_err(|e| (written, e))?;
                }
            }
            SyncMode::Drain => {
                if !driver.supports(Capability::Push) && !driver.supports(Capability::Stream) {
                    return Err(fail(HubError::driver(format!(
                        "driver {} has no staged buffer to drain",
                        driver.type_name()
                    ))));
                }
                loop {
                    if cancel.is_cancelled() {
                        return Err((written, HubError::Cancelled));
                    }
                    let entries = driver
                        .drain(self.config.batch_size)
                        .await
                        .map_err(|e| (written, e))?;
                    if entries.is_empty() {
                        break;
                    }
                    let rows: Vec<Row> = entries.iter().map(|e| e.row.clone()).collect();
                    written += self
                        .flush(request, &rules, rows, &mut progress, &mut quality)
                        .await
                        .map_err(|e| (written, e))?;
                    // Acknowledge only after the batch committed downstream.
                    driver.commit(&entries).await.map_err(|e| (written, e))?;
                }
            }
        }
        progress.finish(written).await;
        if let Some(report) = quality.into_report(&request.interface_id) {
            if let Err(e) = self.store.insert_quality_report(&report).await {
                tracing::warn!(execution = %request.execution_id, error = %e, "quality report write failed");
            }
        }
        Ok(written)
    }

    async fn flush(
        &self,
        request: &SyncRequest,
        rules: &RuleSet,
        rows: Vec<Row>,
        progress: &mut ProgressTracker,
        quality: &mut QualityAccumulator,
    ) -> HubResult<u64> {
        let outcome =
            self.rules
                .process_batch(&request.task_id, &request.interface_id, rules, rows)?;
        let written = if outcome.rows.is_empty() {
            0
        } else {
            self.sink
                .write_batch(&request.schema, &request.table, &request.fields, &outcome.rows)
                .await?;
            outcome.rows.len() as u64
        };
        progress
            .advance(written, outcome.issues.len() as u64)
            .await;
        quality.absorb(&outcome);
        Ok(written)
    }
}

/// Folds per-batch rule outcomes into one per-execution quality report.
#[derive(Default)]
struct QualityAccumulator {
    batches: u64,
    score_sum: f64,
    metric_sums: std::collections::BTreeMap<String, (f64, u64)>,
    issues: Vec<serde_json::Value>,
    dropped_issues: u64,
}

/// Issues kept verbatim on the report; the rest is counted.
const MAX_REPORT_ISSUES: usize = 100;

impl QualityAccumulator {
    fn absorb(&mut self, outcome: &BatchOutcome) {
        if outcome.metrics.is_empty() && outcome.issues.is_empty() {
            return;
        }
        self.batches += 1;
        self.score_sum += outcome.quality_score;
        for (dimension, score) in &outcome.metrics {
            let entry = self.metric_sums.entry(dimension.clone()).or_default();
            entry.0 += score;
            entry.1 += 1;
        }
        for issue in &outcome.issues {
            if self.issues.len() < MAX_REPORT_ISSUES {
                if let Ok(value) = serde_json::to_value(issue) {
                    self.issues.push(value);
                }
            } else {
                self.dropped_issues += 1;
            }
        }
    }

    fn into_report(self, interface_id: &str) -> Option<QualityReport> {
        if self.batches == 0 {
            return None;
        }
        let metrics: std::collections::BTreeMap<String, f64> = self
            .metric_sums
            .into_iter()
            .map(|(dimension, (sum, count))| (dimension, sum / count.max(1) as f64))
            .collect();
        let recommendations: Vec<String> = metrics
            .iter()
            .filter(|(_, score)| **score < 0.9)
            .map(|(dimension, score)| {
                format!("{dimension} at {score:.2}; review the rules feeding this dimension")
            })
            .collect();
        let mut issues = self.issues;
        if self.dropped_issues > 0 {
            issues.push(serde_json::json!({
                "message": format!("{} further issues truncated", self.dropped_issues)
            }));
        }
        Some(QualityReport {
            id: uuid::Uuid::new_v4().to_string(),
            object_type: "data_interface".into(),
            object_id: interface_id.into(),
            quality_score: self.score_sum / self.batches as f64,
            metrics: serde_json::to_value(metrics).unwrap_or_default(),
            issues: serde_json::Value::Array(issues),
            recommendations: serde_json::to_value(recommendations).unwrap_or_default(),
            generated_at: Utc::now(),
        })
    }
}

/// Rate-limited progress snapshots onto the execution row.
struct ProgressTracker {
    store: Arc<dyn TaskStore>,
    execution_id: String,
    interval: Duration,
    last_write: tokio::time::Instant,
    first: bool,
    processed: u64,
    errors: u64,
}

impl ProgressTracker {
    fn new(store: Arc<dyn TaskStore>, execution_id: String, interval: Duration) -> Self {
        Self {
            store,
            execution_id,
            interval,
            last_write: tokio::time::Instant::now(),
            first: true,
            processed: 0,
            errors: 0,
        }
    }

    async fn advance(&mut self, rows: u64, errors: u64) {
        self.processed += rows;
        self.errors += errors;
        if !self.first && self.last_write.elapsed() < self.interval {
            return;
        }
        self.first = false;
        self.last_write = tokio::time::Instant::now();
        self.write().await;
    }

    async fn finish(&mut self, total: u64) {
        self.processed = total;
        self.write().await;
    }

    async fn write(&self) {
        let progress = TaskProgress {
            processed_rows: self.processed,
            total_rows: None,
            error_count: self.errors,
            progress_percent: None,
        };
        if let Err(e) = self
            .store
            .update_execution(
                &self.execution_id,
                ExecutionUpdate {
                    progress: Some(progress),
                    ..ExecutionUpdate::default()
                },
            )
            .await
        {
            tracing::debug!(execution = %self.execution_id, error = %e, "progress write failed");
        }
    }
}
