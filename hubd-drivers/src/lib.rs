//! Data-source drivers and their lifecycle registry.
//!
//! A driver is the in-memory connector serving one cataloged data
//! source. Variants: relational (`postgres`/`mysql`), `http_pull`,
//! `http_post`, `amqp` stream and `file`. The [`DriverManager`] owns
//! every instance; sync workers only borrow them.

pub mod config;
pub mod driver;
pub mod file;
pub mod http_pull;
pub mod http_push;
pub mod manager;
pub mod relational;
pub mod retry;
pub mod stream;

pub use driver::{
    Capability, Driver, DriverStats, FetchParams, HealthProbe, RowStream, StagedEntry, StatsCell,
};
pub use manager::{
    DriverFactory, DriverManager, DriverSettings, FactoryRegistry, ManagerStats, PushSourceInfo,
    SourceHealth, SourceLoader,
};
