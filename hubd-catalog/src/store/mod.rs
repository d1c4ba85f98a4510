//! Postgres-backed metadata store.
//!
//! All catalog entities live in one management schema (`hub_meta`),
//! distinct from the basic/thematic schemas the hub materializes data
//! into. Queries are runtime-checked (`query` / `query_as` with binds).

mod api;
mod events;
mod interfaces;
mod libraries;
mod rules;
mod sources;
mod tasks;

pub use api::ShareTarget;
pub use tasks::ExecutionUpdate;

use hubd_core::HubResult;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Management schema holding every catalog table.
pub const META_SCHEMA: &str = "hub_meta";

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the management schema exists.
    pub async fn connect(database_url: &str) -> HubResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        let catalog = Self::new(pool);
        catalog.ensure_schema().await?;
        Ok(catalog)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent bootstrap of the management schema.
    pub async fn ensure_schema(&self) -> HubResult<()> {
        for statement in BOOTSTRAP_DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(schema = META_SCHEMA, "catalog schema ensured");
        Ok(())
    }

    /// Store connectivity probe for the health surface.
    pub async fn ping(&self) -> HubResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const BOOTSTRAP_DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS hub_meta",
    "CREATE TABLE IF NOT EXISTS hub_meta.basic_libraries (
        id TEXT PRIMARY KEY,
        name_zh TEXT NOT NULL,
        name_en TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.thematic_libraries (
        id TEXT PRIMARY KEY,
        name_zh TEXT NOT NULL,
        name_en TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL,
        domain TEXT NOT NULL,
        access_level TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.data_sources (
        id TEXT PRIMARY KEY,
        library_id TEXT NOT NULL REFERENCES hub_meta.basic_libraries(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        source_type TEXT NOT NULL,
        connection_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        params_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        script TEXT,
        script_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        status TEXT NOT NULL,
        is_resident BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.data_interfaces (
        id TEXT PRIMARY KEY,
        library_id TEXT NOT NULL REFERENCES hub_meta.basic_libraries(id) ON DELETE CASCADE,
        data_source_id TEXT NOT NULL REFERENCES hub_meta.data_sources(id) ON DELETE CASCADE,
        name_zh TEXT NOT NULL,
        name_en TEXT NOT NULL,
        kind TEXT NOT NULL,
        interface_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        parse_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        table_fields JSONB NOT NULL DEFAULT '[]'::jsonb,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (library_id, name_en)
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.thematic_interfaces (
        id TEXT PRIMARY KEY,
        library_id TEXT NOT NULL REFERENCES hub_meta.thematic_libraries(id) ON DELETE CASCADE,
        name_zh TEXT NOT NULL,
        name_en TEXT NOT NULL,
        kind TEXT NOT NULL,
        view_sql TEXT,
        table_fields JSONB,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (library_id, name_en)
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.sync_tasks (
        id TEXT PRIMARY KEY,
        library_type TEXT NOT NULL,
        library_id TEXT NOT NULL,
        data_source_id TEXT NOT NULL,
        interface_ids TEXT[] NOT NULL,
        interface_configs JSONB NOT NULL DEFAULT '{}'::jsonb,
        task_type TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        cron_expression TEXT,
        interval_seconds BIGINT,
        scheduled_time TIMESTAMPTZ,
        status TEXT NOT NULL,
        execution_status TEXT NOT NULL,
        config JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        next_run_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.sync_task_executions (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES hub_meta.sync_tasks(id) ON DELETE CASCADE,
        interface_id TEXT NOT NULL,
        execution_type TEXT NOT NULL,
        status TEXT NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ,
        record_count BIGINT,
        error_message TEXT,
        progress JSONB
    )",
    "CREATE INDEX IF NOT EXISTS idx_executions_task
        ON hub_meta.sync_task_executions (task_id, start_time DESC)",
    "CREATE TABLE IF NOT EXISTS hub_meta.rules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        rule_type TEXT NOT NULL,
        logic JSONB NOT NULL DEFAULT '{}'::jsonb,
        parameters JSONB NOT NULL DEFAULT '{}'::jsonb,
        is_builtin BOOLEAN NOT NULL DEFAULT FALSE,
        is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        version INTEGER NOT NULL DEFAULT 1,
        object_type TEXT,
        object_id TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.quality_reports (
        id TEXT PRIMARY KEY,
        object_type TEXT NOT NULL,
        object_id TEXT NOT NULL,
        quality_score DOUBLE PRECISION NOT NULL,
        metrics JSONB NOT NULL,
        issues JSONB NOT NULL,
        recommendations JSONB NOT NULL,
        generated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.api_applications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        path TEXT NOT NULL UNIQUE,
        thematic_library_id TEXT NOT NULL REFERENCES hub_meta.thematic_libraries(id),
        contact TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.api_interfaces (
        id TEXT PRIMARY KEY,
        api_application_id TEXT NOT NULL REFERENCES hub_meta.api_applications(id) ON DELETE CASCADE,
        thematic_interface_id TEXT NOT NULL REFERENCES hub_meta.thematic_interfaces(id),
        path TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (api_application_id, path)
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.api_keys (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        key_digest TEXT NOT NULL UNIQUE,
        application_ids TEXT[] NOT NULL,
        status TEXT NOT NULL,
        expires_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.api_rate_limits (
        id TEXT PRIMARY KEY,
        application_id TEXT,
        interface_id TEXT,
        limit_per_window BIGINT NOT NULL,
        window_seconds BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_meta.api_usage_logs (
        id TEXT PRIMARY KEY,
        application_id TEXT,
        key_id TEXT,
        api_path TEXT NOT NULL,
        method TEXT NOT NULL,
        status_code INTEGER NOT NULL,
        duration_ms BIGINT NOT NULL,
        request_bytes BIGINT NOT NULL,
        response_bytes BIGINT NOT NULL,
        ip TEXT,
        user_agent TEXT,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_app
        ON hub_meta.api_usage_logs (application_id, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS hub_meta.sse_events (
        id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        user_name TEXT,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        sent BOOLEAN NOT NULL DEFAULT FALSE,
        read BOOLEAN NOT NULL DEFAULT FALSE
    )",
];
