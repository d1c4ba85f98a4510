use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted notification event. Events addressed to a user with no
/// live SSE channel are stored unread; broadcasts omit `user_name`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SseEventRecord {
    pub id: String,
    pub event_type: String,
    pub user_name: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub sent: bool,
    pub read: bool,
}
