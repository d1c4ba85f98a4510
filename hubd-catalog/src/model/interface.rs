use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::ident::valid_identifier;
use super::{str_enum, ResourceStatus};

str_enum! {
    InterfaceKind {
        Realtime => "realtime",
        Batch => "batch",
    }
}

/// One column of a materialization table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableField {
    pub name_en: String,
    pub data_type: String,
    #[serde(default)]
    pub is_nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Field-set invariants: non-empty valid names, unique within the
/// interface, exactly one primary key.
pub fn validate_fields(fields: &[TableField]) -> HubResult<()> {
    if fields.is_empty() {
        return Err(HubError::invalid_input("fields", "must not be empty"));
    }
    let mut seen = std::collections::HashSet::new();
    let mut pk_count = 0usize;
    for field in fields {
        if !valid_identifier(&field.name_en) {
            return Err(HubError::invalid_input(
                format!("fields.{}", field.name_en),
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        if !seen.insert(field.name_en.as_str()) {
            return Err(HubError::invalid_input(
                format!("fields.{}", field.name_en),
                "duplicate field name",
            ));
        }
        if field.is_primary_key {
            pk_count += 1;
        }
    }
    if pk_count != 1 {
        return Err(HubError::invalid_input(
            "fields",
            format!("exactly one primary key required, found {pk_count}"),
        ));
    }
    Ok(())
}

/// Primary-key column of a validated field set.
pub fn primary_key(fields: &[TableField]) -> Option<&TableField> {
    fields.iter().find(|f| f.is_primary_key)
}

/// A named materialization target (table) inside a basic library, bound
/// to one data source.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataInterface {
    pub id: String,
    pub library_id: String,
    pub data_source_id: String,
    pub name_zh: String,
    pub name_en: String,
    #[sqlx(try_from = "String")]
    pub kind: InterfaceKind,
    pub interface_config: serde_json::Value,
    pub parse_config: serde_json::Value,
    pub table_fields: Json<Vec<TableField>>,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
}

impl DataInterface {
    pub fn fields(&self) -> &[TableField] {
        &self.table_fields.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDataInterface {
    pub library_id: String,
    pub data_source_id: String,
    pub name_zh: String,
    pub name_en: String,
    pub kind: InterfaceKind,
    #[serde(default)]
    pub interface_config: serde_json::Value,
    #[serde(default)]
    pub parse_config: serde_json::Value,
    pub table_fields: Vec<TableField>,
}

impl CreateDataInterface {
    pub fn validate(&self) -> HubResult<()> {
        if !valid_identifier(&self.name_en) {
            return Err(HubError::invalid_input(
                "name_en",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        validate_fields(&self.table_fields)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDataInterface {
    pub name_zh: Option<String>,
    pub interface_config: Option<serde_json::Value>,
    pub parse_config: Option<serde_json::Value>,
    pub table_fields: Option<Vec<TableField>>,
    pub status: Option<ResourceStatus>,
}

str_enum! {
    ThematicKind {
        View => "view",
        Table => "table",
    }
}

/// A table or view inside a thematic library, exposed via the proxy.
/// `view` rows carry SQL, `table` rows carry a field set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThematicInterface {
    pub id: String,
    pub library_id: String,
    pub name_zh: String,
    pub name_en: String,
    #[sqlx(try_from = "String")]
    pub kind: ThematicKind,
    pub view_sql: Option<String>,
    pub table_fields: Option<Json<Vec<TableField>>>,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateThematicInterface {
    pub library_id: String,
    pub name_zh: String,
    pub name_en: String,
    pub kind: ThematicKind,
    pub view_sql: Option<String>,
    pub table_fields: Option<Vec<TableField>>,
}

impl CreateThematicInterface {
    pub fn validate(&self) -> HubResult<()> {
        if !valid_identifier(&self.name_en) {
            return Err(HubError::invalid_input(
                "name_en",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        match self.kind {
            ThematicKind::View => {
                if self.view_sql.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(HubError::invalid_input("view_sql", "required for views"));
                }
            }
            ThematicKind::Table => {
                let fields = self
                    .table_fields
                    .as_deref()
                    .ok_or_else(|| HubError::invalid_input("table_fields", "required for tables"))?;
                validate_fields(fields)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateThematicInterface {
    pub name_zh: Option<String>,
    pub view_sql: Option<String>,
    pub table_fields: Option<Vec<TableField>>,
    pub status: Option<ResourceStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, pk: bool) -> TableField {
        TableField {
            name_en: name.into(),
            data_type: "text".into(),
            is_nullable: !pk,
            default: None,
            is_primary_key: pk,
            comment: None,
        }
    }

    #[test]
    fn exactly_one_primary_key() {
        assert!(validate_fields(&[field("id", true), field("v", false)]).is_ok());
        assert!(validate_fields(&[field("id", false)]).is_err());
        assert!(validate_fields(&[field("a", true), field("b", true)]).is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = validate_fields(&[field("id", true), field("id", false)]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn view_requires_sql() {
        let req = CreateThematicInterface {
            library_id: "lib".into(),
            name_zh: "总账".into(),
            name_en: "ledger".into(),
            kind: ThematicKind::View,
            view_sql: None,
            table_fields: None,
        };
        assert!(req.validate().is_err());
    }
}
