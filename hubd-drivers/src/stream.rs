//! Stream driver: AMQP consumer-group subscription (`amqp`).
//!
//! A resident consumer task moves broker deliveries into a bounded
//! staging queue; when the queue is full the consumer awaits, which is
//! the backpressure path. Messages are acknowledged only after the sync
//! worker commits the downstream write (`commit`).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use hubd_catalog::model::DataSource;
use hubd_core::{HubError, HubResult, Row};
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::driver::{Capability, Driver, DriverStats, HealthProbe, StagedEntry, StatsCell};

struct Running {
    connection: Connection,
    channel: lapin::Channel,
    staging: mpsc::Receiver<(Row, u64)>,
    consumer_cancel: CancellationToken,
}

pub struct StreamDriver {
    source_id: String,
    config: StreamConfig,
    running: Mutex<Option<Running>>,
    stats: Arc<StatsCell>,
}

impl StreamDriver {
    pub fn new(source: &DataSource) -> HubResult<Self> {
        Ok(Self {
            source_id: source.id.clone(),
            config: StreamConfig::from_config(&source.connection_config)?,
            running: Mutex::new(None),
            stats: StatsCell::new(),
        })
    }
}

#[async_trait]
impl Driver for StreamDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "amqp"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Stream | Capability::Commit)
    }

    async fn start(&self) -> HubResult<()> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(&self.config.url, options)
            .await
            .map_err(|e| HubError::driver_with("amqp connect failed", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| HubError::driver_with("amqp channel failed", e))?;
        channel
            .basic_qos(64, BasicQosOptions::default())
            .await
            .map_err(|e| HubError::driver_with("amqp qos failed", e))?;
        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| HubError::driver_with("amqp consume failed", e))?;

        let (tx, rx) = mpsc::channel(self.config.staging_capacity);
        let consumer_cancel = CancellationToken::new();
        let task_cancel = consumer_cancel.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    item = consumer.next() => item,
                };
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        stats.record_error();
                        tracing::warn!(error = %e, "amqp delivery error");
                        continue;
                    }
                    None => break,
                };
                let row = match serde_json::from_slice::<serde_json::Value>(&delivery.data) {
                    Ok(serde_json::Value::Object(map)) => map,
                    Ok(other) => {
                        let mut map = Row::new();
                        map.insert("payload".into(), other);
                        map
                    }
                    Err(e) => {
                        stats.record_error();
                        tracing::warn!(error = %e, "dropping non-JSON amqp message");
                        // Reject without requeue so a poison message cannot
                        // wedge the queue.
                        let _ = delivery
                            .nack(lapin::options::BasicNackOptions::default())
                            .await;
                        continue;
                    }
                };
                stats.record_fetch();
                // Blocks when staging is full: broker prefetch stops, which
                // is the intended backpressure.
                if tx.send((row, delivery.delivery_tag)).await.is_err() {
                    break;
                }
            }
        });

        *guard = Some(Running {
            connection,
            channel,
            staging: rx,
            consumer_cancel,
        });
        self.stats.set_running(true);
        tracing::info!(source = %self.source_id, queue = %self.config.queue, "amqp consumer started");
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.take() {
            running.consumer_cancel.cancel();
            let _ = running.connection.close(0, "shutdown").await;
        }
        self.stats.set_running(false);
        Ok(())
    }

    async fn health_check(&self) -> HealthProbe {
        let started = Instant::now();
        let guard = self.running.lock().await;
        let latency = started.elapsed().as_millis() as u64;
        match guard.as_ref() {
            Some(running) if running.connection.status().connected() => HealthProbe::up(latency),
            Some(_) => HealthProbe::down(latency, "connection lost"),
            None => HealthProbe::down(latency, "not started"),
        }
    }

    async fn drain(&self, max: usize) -> HubResult<Vec<StagedEntry>> {
        let mut guard = self.running.lock().await;
        let running = guard
            .as_mut()
            .ok_or_else(|| HubError::Busy("stream driver not started".into()))?;
        let mut out = Vec::new();
        while out.len() < max {
            match running.staging.try_recv() {
                Ok((row, tag)) => out.push(StagedEntry {
                    row,
                    token: Some(tag),
                }),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    /// Per-message acknowledgement after the downstream write committed.
    async fn commit(&self, entries: &[StagedEntry]) -> HubResult<()> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| HubError::Busy("stream driver not started".into()))?;
        for entry in entries {
            if let Some(tag) = entry.token {
                running
                    .channel
                    .basic_ack(tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| HubError::driver_with("amqp ack failed", e))?;
            }
        }
        Ok(())
    }

    fn stats(&self) -> DriverStats {
        let buffered = self
            .running
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|r| r.staging.len()));
        self.stats.snapshot(buffered)
    }
}
