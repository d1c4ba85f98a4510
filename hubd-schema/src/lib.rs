//! Managed-store schema service: guarded DDL, table introspection and
//! reads, and the batch upsert path the sync engine writes through.

pub mod ddl;
pub mod guard;
pub mod service;

pub use ddl::{map_data_type, plan_alter, widens, AlterPlan, LiveColumn};
pub use guard::check_where_clause;
pub use service::{ColumnInfo, SchemaOp, SchemaService, TableInfo};
