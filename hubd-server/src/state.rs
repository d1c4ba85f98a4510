use std::sync::Arc;
use std::time::Instant;

use hubd_catalog::PgCatalog;
use hubd_drivers::DriverManager;
use hubd_events::EventHub;
use hubd_proxy::AccessProxy;
use hubd_rules::RuleEngine;
use hubd_schema::SchemaService;
use hubd_sync::{Scheduler, SyncEngine, SyncTaskService};

/// Process-wide singletons, constructed once in `main` in dependency
/// order and shared into every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: PgCatalog,
    pub schema: SchemaService,
    pub drivers: Arc<DriverManager>,
    pub rules: Arc<RuleEngine>,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<Scheduler>,
    pub tasks: Arc<SyncTaskService>,
    pub events: Arc<EventHub>,
    pub proxy: Arc<AccessProxy>,
    pub started_at: Instant,
}
