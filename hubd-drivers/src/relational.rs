//! Relational pull driver (`postgres`, `mysql`).
//!
//! Pools are created lazily so registry construction never blocks on I/O.
//! `fetch` streams rows through a bounded channel: the database cursor is
//! consumed by a forwarder task and the consumer sees a lazy sequence
//! honoring cancellation, max-rows and the configured timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use hubd_catalog::model::DataSource;
use hubd_core::{HubError, HubResult, Row};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::{substitute, RelationalConfig};
use crate::driver::{Capability, Driver, DriverStats, FetchParams, HealthProbe, RowStream, StatsCell};
use crate::retry;

/// Bound on the in-flight row buffer between the cursor and the consumer.
const CHANNEL_CAPACITY: usize = 256;

enum Backend {
    Postgres(sqlx::PgPool),
    MySql(sqlx::MySqlPool),
}

pub struct RelationalDriver {
    source_id: String,
    type_name: String,
    backend: Backend,
    stats: Arc<StatsCell>,
}

impl RelationalDriver {
    pub fn new(source: &DataSource) -> HubResult<Self> {
        let config = RelationalConfig::from_config(&source.source_type, &source.connection_config)?;
        let backend = match source.source_type.as_str() {
            "postgres" => Backend::Postgres(
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_lazy(&config.url)
                    .map_err(|e| HubError::driver_with("invalid postgres url", e))?,
            ),
            "mysql" => Backend::MySql(
                MySqlPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_lazy(&config.url)
                    .map_err(|e| HubError::driver_with("invalid mysql url", e))?,
            ),
            other => {
                return Err(HubError::invalid_input(
                    "source_type",
                    format!("unsupported relational type {other:?}"),
                ))
            }
        };
        Ok(Self {
            source_id: source.id.clone(),
            type_name: source.source_type.clone(),
            backend,
            stats: StatsCell::new(),
        })
    }

    async fn ping(&self) -> HubResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| HubError::driver_with("postgres ping failed", e))?;
            }
            Backend::MySql(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| HubError::driver_with("mysql ping failed", e))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for RelationalDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Fetch)
    }

    async fn start(&self) -> HubResult<()> {
        self.ping().await?;
        self.stats.set_running(true);
        Ok(())
    }

    async fn stop(&self) -> HubResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => pool.close().await,
            Backend::MySql(pool) => pool.close().await,
        }
        self.stats.set_running(false);
        Ok(())
    }

    async fn health_check(&self) -> HealthProbe {
        let started = Instant::now();
        match self.ping().await {
            Ok(()) => {
                self.stats.touch_ok();
                HealthProbe::up(started.elapsed().as_millis() as u64)
            }
            Err(e) => {
                self.stats.record_error();
                HealthProbe::down(started.elapsed().as_millis() as u64, e.to_string())
            }
        }
    }

    async fn fetch(&self, params: FetchParams, cancel: CancellationToken) -> HubResult<RowStream> {
        let raw_sql = params
            .str_param("sql_query")
            .ok_or_else(|| HubError::invalid_input("params.sql_query", "required"))?;
        let sql = substitute(raw_sql.trim().trim_end_matches(';'), &params.parameters());
        let max_rows = params.max_rows();
        let deadline = params
            .timeout_secs()
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        // Transient connect faults are retried here; an error once the
        // stream is live terminates the sequence instead.
        retry::with_backoff(&cancel, "relational.connect", || self.ping()).await?;
        self.stats.record_fetch();

        let stats = self.stats.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<HubResult<Row>>(CHANNEL_CAPACITY);
        match &self.backend {
            Backend::Postgres(pool) => {
                let pool = pool.clone();
                tokio::spawn(async move {
                    // The store renders each row to JSON itself, so any
                    // column type comes back uniformly.
                    let wrapped =
                        format!("SELECT row_to_json(t)::text AS row_json FROM ({sql}) t");
                    let mut stream = sqlx::query_as::<_, (String,)>(&wrapped).fetch(&pool);
                    let mut sent = 0u64;
                    loop {
                        if reached_limit(sent, max_rows) || past_deadline(deadline) {
                            break;
                        }
                        let next = tokio::select! {
                            _ = cancel.cancelled() => break,
                            item = stream.next() => item,
                        };
                        match next {
                            None => break,
                            Some(Ok((json_text,))) => {
                                let row = match serde_json::from_str::<Row>(&json_text) {
                                    Ok(row) => row,
                                    Err(e) => {
                                        stats.record_error();
                                        let _ = tx
                                            .send(Err(HubError::driver_with(
                                                "row decode failed",
                                                e,
                                            )))
                                            .await;
                                        break;
                                    }
                                };
                                sent += 1;
                                if tx.send(Ok(row)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                stats.record_error();
                                let _ = tx
                                    .send(Err(HubError::driver_with("fetch failed", e)))
                                    .await;
                                break;
                            }
                        }
                    }
                });
            }
            Backend::MySql(pool) => {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let mut stream = sqlx::query(&sql).fetch(&pool);
                    let mut sent = 0u64;
                    loop {
                        if reached_limit(sent, max_rows) || past_deadline(deadline) {
                            break;
                        }
                        let next = tokio::select! {
                            _ = cancel.cancelled() => break,
                            item = stream.next() => item,
                        };
                        match next {
                            None => break,
                            Some(Ok(row)) => {
                                sent += 1;
                                if tx.send(Ok(mysql_row_to_json(&row))).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                stats.record_error();
                                let _ = tx
                                    .send(Err(HubError::driver_with("fetch failed", e)))
                                    .await;
                                break;
                            }
                        }
                    }
                });
            }
        }
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn stats(&self) -> DriverStats {
        self.stats.snapshot(None)
    }
}

fn reached_limit(sent: u64, max_rows: Option<u64>) -> bool {
    max_rows.map(|max| sent >= max).unwrap_or(false)
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

/// Best-effort dynamic decode of one MySQL row. Unknown column types fall
/// back through a widening cascade and finally to NULL.
fn mysql_row_to_json(row: &sqlx::mysql::MySqlRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
                .try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(index)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "FLOAT" | "DOUBLE" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(index)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
            "JSON" => row.try_get::<Option<serde_json::Value>, _>(index).ok().flatten(),
            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(index)
                .ok()
                .flatten()
                .map(|dt| serde_json::Value::from(dt.and_utc().to_rfc3339())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(index)
                .ok()
                .flatten()
                .map(|d| serde_json::Value::from(d.to_string())),
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map(serde_json::Value::from),
        };
        out.insert(name, value.unwrap_or(serde_json::Value::Null));
    }
    out
}
