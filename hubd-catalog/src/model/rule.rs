use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use serde::{Deserialize, Serialize};

use super::str_enum;

str_enum! {
    RuleKind {
        Quality => "quality",
        Cleansing => "cleansing",
        Masking => "masking",
    }
}

str_enum! {
    Severity {
        Info => "info",
        Warning => "warning",
        Error => "error",
        Critical => "critical",
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

/// A quality, cleansing or masking rule. `logic` and `parameters` are
/// opaque at the catalog layer; the rule engine validates its own subset
/// on read.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub kind: RuleKind,
    /// Engine-level discriminator, e.g. `not_null`, `trim`, `mask`.
    pub rule_type: String,
    pub logic: serde_json::Value,
    pub parameters: serde_json::Value,
    pub is_builtin: bool,
    pub is_enabled: bool,
    pub version: i32,
    /// Optional binding target.
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRule {
    pub name: String,
    pub kind: RuleKind,
    pub rule_type: String,
    #[serde(default)]
    pub logic: serde_json::Value,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    pub object_type: Option<String>,
    pub object_id: Option<String>,
}

impl CreateRule {
    pub fn validate(&self) -> HubResult<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::invalid_input("name", "must not be empty"));
        }
        if self.rule_type.trim().is_empty() {
            return Err(HubError::invalid_input("rule_type", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRule {
    pub name: Option<String>,
    pub logic: Option<serde_json::Value>,
    pub parameters: Option<serde_json::Value>,
    pub is_enabled: Option<bool>,
}

/// Quality assessment produced after a batch run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QualityReport {
    pub id: String,
    pub object_type: String,
    pub object_id: String,
    pub quality_score: f64,
    /// Per-dimension scores in [0,1].
    pub metrics: serde_json::Value,
    pub issues: serde_json::Value,
    pub recommendations: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}
