use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The JSON frame delivered over SSE:
/// `{ "id", "event_type", "user_name", "data", "created_at" }` with an
/// RFC3339 timestamp. Broadcasts carry `user_name: null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubEvent {
    pub id: String,
    pub event_type: String,
    pub user_name: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl HubEvent {
    pub fn for_user(
        event_type: impl Into<String>,
        user_name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            user_name: Some(user_name.into()),
            data,
            created_at: Utc::now(),
        }
    }

    pub fn broadcast(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            user_name: None,
            data,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape() {
        let event = HubEvent::for_user("task_completed", "alice", serde_json::json!({"id": 7}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "task_completed");
        assert_eq!(json["user_name"], "alice");
        assert_eq!(json["data"]["id"], 7);
        // RFC3339 timestamp.
        assert!(json["created_at"].as_str().unwrap().contains('T'));

        let broadcast = HubEvent::broadcast("notice", serde_json::json!({}));
        let json = serde_json::to_value(&broadcast).unwrap();
        assert!(json["user_name"].is_null());
    }
}
