//! Sync stack: the batch engine, the trigger scheduler and the task
//! state-machine service gluing drivers, rules and storage together.

pub mod engine;
pub mod scheduler;
pub mod service;
pub mod store;

pub use engine::{EngineConfig, EngineStats, OutcomeNotice, SyncEngine, SyncMode, SyncRequest};
pub use scheduler::{parse_cron, FireOutcome, ScheduledEntryInfo, Scheduler, TaskLauncher, TriggerSpec};
pub use service::SyncTaskService;
pub use store::{RowSink, TaskStore};
