//! Data-access proxy: authenticated read-only gateway in front of the
//! thematic store, with schema routing, streamed response copying,
//! token-bucket rate limiting and best-effort usage logging.

pub mod handler;
pub mod limiter;
pub mod resolve;
pub mod token;
pub mod usage;

pub use handler::{bearer_token, build_downstream_headers, AccessProxy, ProxyConfig};
pub use limiter::RateLimiter;
pub use resolve::ShareStore;
pub use token::{PasswordTokenSource, TokenHolder, TokenSource};
pub use usage::UsageLogger;
