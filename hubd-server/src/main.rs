use std::sync::Arc;
use std::time::{Duration, Instant};

use hubd_catalog::PgCatalog;
use hubd_core::{HubConfig, HubResult};
use hubd_drivers::{DriverManager, DriverSettings, FactoryRegistry};
use hubd_events::EventHub;
use hubd_proxy::{AccessProxy, PasswordTokenSource, ProxyConfig, TokenHolder, UsageLogger};
use hubd_rules::{RuleEngine, RuleEngineConfig};
use hubd_schema::SchemaService;
use hubd_server::{router, AppState};
use hubd_sync::{EngineConfig, Scheduler, SyncEngine, SyncTaskService};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    hubd_core::init_tracing();
    let config = match HubConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "hubd exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: HubConfig) -> HubResult<()> {
    // Singletons are built in dependency order and torn down in reverse.
    let catalog = PgCatalog::connect(&config.database_url).await?;
    let schema = SchemaService::new(catalog.pool().clone());

    let drivers = Arc::new(DriverManager::new(
        Arc::new(catalog.clone()),
        FactoryRegistry::builtin(),
        DriverSettings {
            push_buffer_capacity: config.push_buffer_capacity,
            health_check_timeout: config.health_check_timeout,
        },
    ));
    drivers.start_residents().await?;

    let rules = Arc::new(RuleEngine::new(RuleEngineConfig::default()));
    let (engine, outcomes) = SyncEngine::new(
        EngineConfig {
            queue_capacity: config.submit_queue_capacity,
            workers: config.effective_workers(),
            batch_size: config.batch_size,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        },
        drivers.clone(),
        rules.clone(),
        Arc::new(schema.clone()),
        Arc::new(catalog.clone()),
    );
    engine.start().await;

    let scheduler = Scheduler::new(Duration::from_millis(500));
    let events = Arc::new(EventHub::new(
        config.sse_channel_capacity,
        Some(Arc::new(catalog.clone())),
    ));
    let tasks = SyncTaskService::new(
        Arc::new(catalog.clone()),
        engine.clone(),
        scheduler.clone(),
        events.clone(),
    );
    tasks.start_aggregator(outcomes);
    tasks.restore_schedules().await?;
    scheduler.run(tasks.clone());

    let token = TokenHolder::new();
    let refresh_cancel = CancellationToken::new();
    if let Some(auth_url) = &config.postgrest_auth_url {
        let source = Arc::new(PasswordTokenSource::new(
            auth_url.clone(),
            config.db_user.clone(),
            config.db_password.clone(),
        )?);
        token.spawn_refresh(source, config.token_refresh_interval, refresh_cancel.clone());
    }
    let usage = UsageLogger::start(Arc::new(catalog.clone()), config.usage_log_capacity);
    let proxy = Arc::new(AccessProxy::new(
        Arc::new(catalog.clone()),
        ProxyConfig {
            downstream_url: config.postgrest_url.trim_end_matches('/').to_string(),
            timeout: config.proxy_timeout,
        },
        token,
        usage,
    )?);

    let state = AppState {
        catalog: catalog.clone(),
        schema,
        drivers: drivers.clone(),
        rules,
        engine: engine.clone(),
        scheduler: scheduler.clone(),
        tasks,
        events: events.clone(),
        proxy,
        started_at: Instant::now(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| hubd_core::HubError::internal(format!("bind {}: {e}", config.bind_addr)))?;
    tracing::info!(addr = %config.bind_addr, "hubd listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| hubd_core::HubError::internal(e.to_string()))?;

    tracing::info!("shutting down");
    scheduler.stop();
    engine.shutdown();
    drivers.shutdown().await;
    events.close_all().await;
    refresh_cancel.cancel();
    catalog.pool().close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler installation")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
