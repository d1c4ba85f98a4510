use chrono::{DateTime, Utc};

/// Fresh opaque entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC timestamp; all persisted times are UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
