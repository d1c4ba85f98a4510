//! Schema service over the managed store.
//!
//! Owns every DDL touch and raw table read against the basic/thematic
//! schemas. All identifiers pass the pattern gate, every caller-supplied
//! filter passes the where-clause guard, and `alter` runs through the
//! diff planner so destructive changes stay behind the `force` flag.

use hubd_catalog::model::TableField;
use hubd_core::{HubError, HubResult, Row};
use sqlx::PgPool;

use crate::ddl::{self, qualified, LiveColumn};
use crate::guard::check_where_clause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOp {
    Create,
    Alter,
    Drop,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct SchemaService {
    pool: PgPool,
}

impl SchemaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_tables(&self, schema: &str) -> HubResult<Vec<String>> {
        validate_ident("schema", schema)?;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn get_table_info(&self, schema: &str, table: &str) -> HubResult<TableInfo> {
        let live = self.live_columns(schema, table).await?;
        if live.is_empty() {
            return Err(HubError::NotFound(format!("table {schema}.{table}")));
        }
        let comment: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT obj_description(c.oid) FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        let columns = live
            .into_iter()
            .map(|c| ColumnInfo {
                name: c.name,
                data_type: c.data_type,
                is_nullable: c.is_nullable,
                is_primary_key: c.is_primary_key,
                comment: None,
            })
            .collect();
        Ok(TableInfo {
            columns,
            comment: comment.and_then(|(c,)| c),
        })
    }

    /// Read rows with an optional pre-escaped filter. The result set is
    /// rendered to JSON by the database itself so arbitrary column types
    /// come back uniformly.
    pub async fn get_table_data(
        &self,
        schema: &str,
        table: &str,
        limit: u64,
        offset: u64,
        where_clause: Option<&str>,
    ) -> HubResult<(Vec<Row>, u64)> {
        let target = qualified(schema, table)?;
        let filter = match where_clause.map(str::trim).filter(|w| !w.is_empty()) {
            Some(clause) => {
                check_where_clause(clause)?;
                format!(" WHERE {clause}")
            }
            None => String::new(),
        };
        let limit = limit.clamp(1, 10_000);

        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {target}{filter}"))
            .fetch_one(&self.pool)
            .await?;

        let payload: (serde_json::Value,) = sqlx::query_as(&format!(
            "SELECT COALESCE(json_agg(row_to_json(t)), '[]'::json) FROM \
             (SELECT * FROM {target}{filter} LIMIT {limit} OFFSET {offset}) t"
        ))
        .fetch_one(&self.pool)
        .await?;
        let rows = match payload.0 {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok((rows, total.0 as u64))
    }

    /// Create, diff-alter or drop the physical table behind an interface.
    pub async fn manage_table_schema(
        &self,
        op: SchemaOp,
        schema: &str,
        table: &str,
        fields: &[TableField],
        force: bool,
    ) -> HubResult<()> {
        match op {
            SchemaOp::Create => {
                self.ensure_library_schema(schema).await?;
                for statement in ddl::build_create_table(schema, table, fields)? {
                    sqlx::query(&statement).execute(&self.pool).await?;
                }
                tracing::info!(schema, table, "table created");
            }
            SchemaOp::Alter => {
                let live = self.live_columns(schema, table).await?;
                if live.is_empty() {
                    return Err(HubError::NotFound(format!("table {schema}.{table}")));
                }
                let plan = ddl::plan_alter(schema, table, fields, &live)?;
                if !force {
                    for column in &plan.drop {
                        if self.column_has_data(schema, table, column).await? {
                            return Err(HubError::UnsafeQuery(format!(
                                "column {column:?} holds data; pass force to drop it"
                            )));
                        }
                    }
                }
                for statement in &plan.statements {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                tracing::info!(
                    schema,
                    table,
                    added = plan.add.len(),
                    dropped = plan.drop.len(),
                    "table altered"
                );
            }
            SchemaOp::Drop => {
                let target = qualified(schema, table)?;
                sqlx::query(&format!("DROP TABLE IF EXISTS {target}"))
                    .execute(&self.pool)
                    .await?;
                tracing::info!(schema, table, "table dropped");
            }
        }
        Ok(())
    }

    pub async fn ensure_library_schema(&self, schema: &str) -> HubResult<()> {
        validate_ident("schema", schema)?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn drop_library_schema(&self, schema: &str, force: bool) -> HubResult<()> {
        validate_ident("schema", schema)?;
        let cascade = if force { " CASCADE" } else { "" };
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{schema}\"{cascade}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// (Re)materialize a thematic view. The SQL is management-authored; it
    /// still must not smuggle extra statements.
    pub async fn create_or_replace_view(
        &self,
        schema: &str,
        name: &str,
        view_sql: &str,
    ) -> HubResult<()> {
        let target = qualified(schema, name)?;
        if view_sql.contains(';') {
            return Err(HubError::UnsafeQuery(
                "view SQL must be a single statement".into(),
            ));
        }
        self.ensure_library_schema(schema).await?;
        sqlx::query(&format!("CREATE OR REPLACE VIEW {target} AS {view_sql}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn drop_view(&self, schema: &str, name: &str) -> HubResult<()> {
        let target = qualified(schema, name)?;
        sqlx::query(&format!("DROP VIEW IF EXISTS {target}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert one batch keyed by the interface primary key. A batch is a
    /// single INSERT statement, so it commits atomically.
    pub async fn upsert_batch(
        &self,
        schema: &str,
        table: &str,
        fields: &[TableField],
        rows: &[Row],
    ) -> HubResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let target = qualified(schema, table)?;
        let pk = hubd_catalog::model::primary_key(fields)
            .ok_or_else(|| HubError::invalid_input("fields", "missing primary key"))?;
        let columns: Vec<&str> = fields.iter().map(|f| f.name_en.as_str()).collect();

        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let rendered = columns
                .iter()
                .map(|c| render_value(row.get(*c)))
                .collect::<HubResult<Vec<_>>>()?
                .join(", ");
            tuples.push(format!("({rendered})"));
        }
        let updates = columns
            .iter()
            .filter(|c| **c != pk.name_en)
            .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict_action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };
        let statement = format!(
            "INSERT INTO {target} ({column_list}) VALUES {} \
             ON CONFLICT (\"{}\") {conflict_action}",
            tuples.join(", "),
            pk.name_en
        );
        let result = sqlx::query(&statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn live_columns(&self, schema: &str, table: &str) -> HubResult<Vec<LiveColumn>> {
        validate_ident("schema", schema)?;
        validate_ident("table", table)?;
        Ok(sqlx::query_as::<_, LiveColumn>(
            "SELECT c.column_name AS name, c.data_type AS data_type, \
                    (c.is_nullable = 'YES') AS is_nullable, \
                    (kcu.column_name IS NOT NULL) AS is_primary_key \
             FROM information_schema.columns c \
             LEFT JOIN information_schema.table_constraints tc \
               ON tc.table_schema = c.table_schema AND tc.table_name = c.table_name \
              AND tc.constraint_type = 'PRIMARY KEY' \
             LEFT JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = c.table_schema AND kcu.table_name = c.table_name \
              AND kcu.column_name = c.column_name \
             WHERE c.table_schema = $1 AND c.table_name = $2 \
             ORDER BY c.ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn column_has_data(&self, schema: &str, table: &str, column: &str) -> HubResult<bool> {
        let target = qualified(schema, table)?;
        validate_ident("column", column)?;
        let row: Option<(i32,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {target} WHERE \"{column}\" IS NOT NULL LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

fn validate_ident(what: &str, name: &str) -> HubResult<()> {
    if hubd_catalog::model::valid_identifier(name) {
        Ok(())
    } else {
        Err(HubError::invalid_input(what, "invalid identifier"))
    }
}

/// Render one JSON value as a SQL literal; Postgres coerces string
/// literals to the column type.
fn render_value(value: Option<&serde_json::Value>) -> HubResult<String> {
    Ok(match value {
        None | Some(serde_json::Value::Null) => "NULL".into(),
        Some(serde_json::Value::Bool(b)) => {
            if *b {
                "TRUE".into()
            } else {
                "FALSE".into()
            }
        }
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => quote_text(s),
        Some(other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
            quote_text(&serde_json::to_string(other)?)
        }
    })
}

fn quote_text(s: &str) -> String {
    // Postgres rejects NUL bytes in text; everything else round-trips
    // through '' escaping with standard_conforming_strings.
    let cleaned: String = s.chars().filter(|c| *c != '\0').collect();
    format!("'{}'", cleaned.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_value_escapes_quotes() {
        assert_eq!(render_value(None).unwrap(), "NULL");
        assert_eq!(
            render_value(Some(&serde_json::json!("O'Brien"))).unwrap(),
            "'O''Brien'"
        );
        assert_eq!(render_value(Some(&serde_json::json!(42))).unwrap(), "42");
        assert_eq!(render_value(Some(&serde_json::json!(true))).unwrap(), "TRUE");
        assert_eq!(
            render_value(Some(&serde_json::json!({"a": 1}))).unwrap(),
            "'{\"a\":1}'"
        );
    }

    #[test]
    fn render_value_strips_nul() {
        assert_eq!(
            render_value(Some(&serde_json::json!("a\0b"))).unwrap(),
            "'ab'"
        );
    }
}
