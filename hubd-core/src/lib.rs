//! Shared kernel for the hubd data hub service.
//!
//! Holds the pieces every other crate leans on: the error taxonomy with its
//! business-code mapping, the uniform management response envelope, typed
//! configuration, and pagination types.

pub mod config;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod page;

pub use config::{init_tracing, HubConfig};
pub use envelope::Envelope;
pub use error::{HubError, HubResult};
pub use page::{Page, Pageable, MAX_PAGE_SIZE};

/// A single data row as it flows driver -> rules -> storage: a
/// column-keyed JSON map.
pub type Row = serde_json::Map<String, serde_json::Value>;
