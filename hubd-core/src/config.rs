//! Service configuration.
//!
//! Values come from an optional YAML file (path in `HUBD_CONFIG`) with
//! environment variables taking precedence. `.env` files are honored via
//! dotenvy. All durations are seconds in the file / environment.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{HubError, HubResult};

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Connection string for the managed store / metadata catalog.
    pub database_url: String,
    /// Base URL of the downstream read store the proxy forwards to.
    pub postgrest_url: String,
    /// Optional token endpoint for the downstream store. When unset the
    /// proxy forwards without an Authorization header.
    pub postgrest_auth_url: Option<String>,
    pub db_user: String,
    pub db_password: String,
    /// Proxy forward timeout.
    pub proxy_timeout: Duration,
    /// Downstream token refresh cadence.
    pub token_refresh_interval: Duration,
    /// Sync engine submit queue bound.
    pub submit_queue_capacity: usize,
    /// Sync worker count; 0 means CPU count x 2.
    pub worker_count: usize,
    /// Rows per storage batch.
    pub batch_size: usize,
    /// Progress snapshot cadence.
    pub progress_interval_ms: u64,
    /// Per-connection SSE channel bound.
    pub sse_channel_capacity: usize,
    /// HTTP-push driver ring buffer bound.
    pub push_buffer_capacity: usize,
    /// Per-driver health check timeout.
    pub health_check_timeout: Duration,
    /// Usage-log pipeline bound.
    pub usage_log_capacity: usize,
}

/// Optional file-backed overrides; every field defaults when absent.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    database_url: Option<String>,
    postgrest_url: Option<String>,
    postgrest_auth_url: Option<String>,
    proxy_timeout_secs: Option<u64>,
    token_refresh_secs: Option<u64>,
    submit_queue_capacity: Option<usize>,
    worker_count: Option<usize>,
    batch_size: Option<usize>,
    progress_interval_ms: Option<u64>,
    sse_channel_capacity: Option<usize>,
    push_buffer_capacity: Option<usize>,
    health_check_timeout_secs: Option<u64>,
    usage_log_capacity: Option<usize>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> HubResult<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| HubError::invalid_input(name, format!("unparseable value {raw:?}"))),
    }
}

impl HubConfig {
    /// Load configuration from `HUBD_CONFIG` (if set) and the environment.
    pub fn load() -> HubResult<Self> {
        let _ = dotenvy::dotenv();

        let file = match env_var("HUBD_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| HubError::invalid_input("HUBD_CONFIG", e))?;
                Self::parse_file(&raw)?
            }
            None => FileConfig::default(),
        };
        Self::resolve(file)
    }

    fn parse_file(raw: &str) -> HubResult<FileConfig> {
        serde_yaml::from_str(raw).map_err(|e| HubError::invalid_input("HUBD_CONFIG", e))
    }

    fn resolve(file: FileConfig) -> HubResult<Self> {
        let db_user = env_var("DB_USER").unwrap_or_else(|| "hubd".into());
        let db_password = env_var("DB_PASSWORD").unwrap_or_default();

        let database_url = env_var("DATABASE_URL")
            .or(file.database_url)
            .unwrap_or_else(|| {
                let host = env_var("DB_HOST").unwrap_or_else(|| "localhost".into());
                let port = env_var("DB_PORT").unwrap_or_else(|| "5432".into());
                let name = env_var("DB_NAME").unwrap_or_else(|| "hubd".into());
                format!("postgres://{db_user}:{db_password}@{host}:{port}/{name}")
            });

        Ok(Self {
            bind_addr: env_var("HUBD_BIND")
                .or(file.bind_addr)
                .unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url,
            postgrest_url: env_var("POSTGREST_URL")
                .or(file.postgrest_url)
                .unwrap_or_else(|| "http://localhost:3000".into()),
            postgrest_auth_url: env_var("POSTGREST_AUTH_URL").or(file.postgrest_auth_url),
            db_user,
            db_password,
            proxy_timeout: Duration::from_secs(
                env_parse("HUBD_PROXY_TIMEOUT_SECS")?
                    .or(file.proxy_timeout_secs)
                    .unwrap_or(30),
            ),
            token_refresh_interval: Duration::from_secs(
                env_parse("HUBD_TOKEN_REFRESH_SECS")?
                    .or(file.token_refresh_secs)
                    .unwrap_or(55 * 60),
            ),
            submit_queue_capacity: env_parse("HUBD_SUBMIT_QUEUE")?
                .or(file.submit_queue_capacity)
                .unwrap_or(1024),
            worker_count: env_parse("HUBD_WORKERS")?.or(file.worker_count).unwrap_or(0),
            batch_size: env_parse("HUBD_BATCH_SIZE")?.or(file.batch_size).unwrap_or(500),
            progress_interval_ms: env_parse("HUBD_PROGRESS_INTERVAL_MS")?
                .or(file.progress_interval_ms)
                .unwrap_or(1000),
            sse_channel_capacity: env_parse("HUBD_SSE_CAPACITY")?
                .or(file.sse_channel_capacity)
                .unwrap_or(64),
            push_buffer_capacity: env_parse("HUBD_PUSH_BUFFER")?
                .or(file.push_buffer_capacity)
                .unwrap_or(10_000),
            health_check_timeout: Duration::from_secs(
                env_parse("HUBD_HEALTH_TIMEOUT_SECS")?
                    .or(file.health_check_timeout_secs)
                    .unwrap_or(5),
            ),
            usage_log_capacity: env_parse("HUBD_USAGE_LOG_CAPACITY")?
                .or(file.usage_log_capacity)
                .unwrap_or(4096),
        })
    }

    /// Effective worker count, resolving the CPU-derived default.
    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }
}

/// Initialize tracing with an env-filter; safe to call once from `main`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let cfg = HubConfig::resolve(FileConfig::default()).unwrap();
        assert_eq!(cfg.submit_queue_capacity, 1024);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.progress_interval_ms, 1000);
        assert_eq!(cfg.sse_channel_capacity, 64);
        assert_eq!(cfg.push_buffer_capacity, 10_000);
        assert_eq!(cfg.health_check_timeout, Duration::from_secs(5));
        assert_eq!(cfg.proxy_timeout, Duration::from_secs(30));
        assert_eq!(cfg.token_refresh_interval, Duration::from_secs(3300));
        assert!(cfg.effective_workers() >= 1);
    }

    #[test]
    fn file_values_apply() {
        let file = HubConfig::parse_file(
            "bind_addr: 127.0.0.1:9999\nbatch_size: 64\nproxy_timeout_secs: 5\n",
        )
        .unwrap();
        let cfg = HubConfig::resolve(file).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9999");
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.proxy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn malformed_file_rejected() {
        assert!(HubConfig::parse_file("batch_size: [not a number]").is_err());
    }
}
