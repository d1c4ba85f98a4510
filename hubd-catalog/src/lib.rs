//! Metadata catalog: entity models plus the Postgres-backed store.
//!
//! The catalog is the canonical source of truth; in-memory caches held by
//! other components (driver instances, SSE subscribers, scheduler entries)
//! may lag it by at most one reload.

pub mod model;
pub mod store;

pub use model::*;
pub use store::{ExecutionUpdate, PgCatalog, ShareTarget, META_SCHEMA};
