use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use serde::{Deserialize, Serialize};

use super::{str_enum, ResourceStatus};

str_enum! {
    SourceCategory {
        Db => "db",
        Http => "http",
        Stream => "stream",
        File => "file",
    }
}

/// A registered external data source. The driver instance that serves it
/// lives in the driver manager and is created lazily on first use, or
/// eagerly when `is_resident` is set.
///
/// `source_type` selects the concrete driver within the category, e.g.
/// `mysql`, `postgres`, `http_pull`, `http_post`, `amqp`, `file`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataSource {
    pub id: String,
    pub library_id: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub category: SourceCategory,
    pub source_type: String,
    /// Opaque connector settings; each driver validates its own subset.
    pub connection_config: serde_json::Value,
    /// Opaque fetch defaults merged under task config at sync time.
    pub params_config: serde_json::Value,
    /// Optional transform script applied by the driver when enabled.
    pub script: Option<String>,
    pub script_enabled: bool,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub is_resident: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDataSource {
    pub library_id: String,
    pub name: String,
    pub category: SourceCategory,
    pub source_type: String,
    #[serde(default)]
    pub connection_config: serde_json::Value,
    #[serde(default)]
    pub params_config: serde_json::Value,
    pub script: Option<String>,
    #[serde(default)]
    pub script_enabled: bool,
    #[serde(default)]
    pub is_resident: bool,
}

impl CreateDataSource {
    pub fn validate(&self) -> HubResult<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::invalid_input("name", "must not be empty"));
        }
        if self.source_type.trim().is_empty() {
            return Err(HubError::invalid_input("source_type", "must not be empty"));
        }
        if !self.connection_config.is_object() && !self.connection_config.is_null() {
            return Err(HubError::invalid_input(
                "connection_config",
                "must be an object",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDataSource {
    pub name: Option<String>,
    pub connection_config: Option<serde_json::Value>,
    pub params_config: Option<serde_json::Value>,
    pub script: Option<Option<String>>,
    pub script_enabled: Option<bool>,
    pub status: Option<ResourceStatus>,
    pub is_resident: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CreateDataSource {
        CreateDataSource {
            library_id: "lib".into(),
            name: "orders_db".into(),
            category: SourceCategory::Db,
            source_type: "postgres".into(),
            connection_config: serde_json::json!({"host": "db"}),
            params_config: serde_json::Value::Null,
            script: None,
            script_enabled: false,
            is_resident: false,
        }
    }

    #[test]
    fn validate_accepts_object_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn validate_rejects_scalar_config() {
        let mut req = base();
        req.connection_config = serde_json::json!("tcp://db");
        assert!(req.validate().is_err());
    }
}
