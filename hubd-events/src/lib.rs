//! Event fan-out bus and SSE delivery for hubd.

pub mod event;
pub mod hub;
pub mod sse;

pub use event::HubEvent;
pub use hub::{ClientHandle, ConnectionInfo, EventHub, EventStore, DEFAULT_CHANNEL_CAPACITY};
pub use sse::SseClient;
