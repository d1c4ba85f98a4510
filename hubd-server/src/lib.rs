//! Server assembly: process state and HTTP routes. The binary lives in
//! `main.rs`; this library exists so the route tree is testable
//! in-process.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
