//! DDL construction and the desired-vs-live diff for `alter`.

use hubd_catalog::model::{valid_identifier, TableField};
use hubd_core::{HubError, HubResult};

/// Map a logical field type to its Postgres column type.
pub fn map_data_type(logical: &str) -> HubResult<&'static str> {
    Ok(match logical.to_ascii_lowercase().as_str() {
        "string" | "text" | "varchar" => "text",
        "smallint" => "smallint",
        "int" | "integer" => "integer",
        "long" | "bigint" => "bigint",
        "float" | "real" => "real",
        "double" | "number" => "double precision",
        "decimal" | "numeric" => "numeric",
        "bool" | "boolean" => "boolean",
        "date" => "date",
        "time" => "time",
        "timestamp" | "datetime" => "timestamptz",
        "json" | "jsonb" | "object" | "array" => "jsonb",
        "uuid" => "uuid",
        "bytes" | "bytea" | "binary" => "bytea",
        other => {
            return Err(HubError::invalid_input(
                "data_type",
                format!("unsupported type {other:?}"),
            ))
        }
    })
}

/// Widening conversions considered safe for in-place `ALTER COLUMN TYPE`.
pub fn widens(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        ("smallint", "integer")
            | ("smallint", "bigint")
            | ("smallint", "numeric")
            | ("integer", "bigint")
            | ("integer", "numeric")
            | ("bigint", "numeric")
            | ("real", "double precision")
            | ("real", "numeric")
            | ("double precision", "numeric")
            | ("character varying", "text")
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// `schema.table` with both parts validated and quoted.
pub fn qualified(schema: &str, table: &str) -> HubResult<String> {
    if !valid_identifier(schema) {
        return Err(HubError::invalid_input("schema", "invalid identifier"));
    }
    if !valid_identifier(table) {
        return Err(HubError::invalid_input("table", "invalid identifier"));
    }
    Ok(format!("{}.{}", quote_ident(schema), quote_ident(table)))
}

fn column_clause(field: &TableField) -> HubResult<String> {
    let mut clause = format!("{} {}", quote_ident(&field.name_en), map_data_type(&field.data_type)?);
    if field.is_primary_key {
        clause.push_str(" PRIMARY KEY");
    } else if !field.is_nullable {
        clause.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        if !default.trim().is_empty() {
            clause.push_str(&format!(" DEFAULT {}", literal(default)));
        }
    }
    Ok(clause)
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CREATE TABLE IF NOT EXISTS` plus column comments. Field invariants
/// (exactly one PK, valid unique names) must already hold.
pub fn build_create_table(
    schema: &str,
    table: &str,
    fields: &[TableField],
) -> HubResult<Vec<String>> {
    hubd_catalog::model::validate_fields(fields)?;
    let target = qualified(schema, table)?;
    let columns = fields
        .iter()
        .map(column_clause)
        .collect::<HubResult<Vec<_>>>()?
        .join(", ");
    let mut statements = vec![format!("CREATE TABLE IF NOT EXISTS {target} ({columns})")];
    for field in fields {
        if let Some(comment) = field.comment.as_deref().filter(|c| !c.trim().is_empty()) {
            statements.push(format!(
                "COMMENT ON COLUMN {target}.{} IS {}",
                quote_ident(&field.name_en),
                literal(comment)
            ));
        }
    }
    Ok(statements)
}

/// A live column as read back from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
}

/// Planned mutations for one `alter` call.
#[derive(Debug, Default, PartialEq)]
pub struct AlterPlan {
    pub add: Vec<String>,
    /// Column names to drop; the service gates non-empty drops on `force`.
    pub drop: Vec<String>,
    pub statements: Vec<String>,
}

/// Diff the desired field set against the live schema.
///
/// Adds missing columns, widens types, and relaxes/tightens nullability.
/// A rename is not inferred: it shows up as a drop plus an add. Narrowing
/// a type is refused outright; dropping the primary key is refused.
pub fn plan_alter(
    schema: &str,
    table: &str,
    desired: &[TableField],
    live: &[LiveColumn],
) -> HubResult<AlterPlan> {
    hubd_catalog::model::validate_fields(desired)?;
    let target = qualified(schema, table)?;
    let mut plan = AlterPlan::default();

    for field in desired {
        let wanted_type = map_data_type(&field.data_type)?;
        match live.iter().find(|c| c.name == field.name_en) {
            None => {
                plan.add.push(field.name_en.clone());
                plan.statements.push(format!(
                    "ALTER TABLE {target} ADD COLUMN {}",
                    column_clause(field)?
                ));
            }
            Some(live_col) => {
                if live_col.data_type != wanted_type {
                    if !widens(&live_col.data_type, wanted_type) {
                        return Err(HubError::UnsafeQuery(format!(
                            "column {:?}: narrowing {} -> {} is not safe",
                            field.name_en, live_col.data_type, wanted_type
                        )));
                    }
                    plan.statements.push(format!(
                        "ALTER TABLE {target} ALTER COLUMN {} TYPE {wanted_type}",
                        quote_ident(&field.name_en)
                    ));
                }
                if live_col.is_nullable != field.is_nullable && !field.is_primary_key {
                    let action = if field.is_nullable {
                        "DROP NOT NULL"
                    } else {
                        "SET NOT NULL"
                    };
                    plan.statements.push(format!(
                        "ALTER TABLE {target} ALTER COLUMN {} {action}",
                        quote_ident(&field.name_en)
                    ));
                }
            }
        }
    }

    for live_col in live {
        if desired.iter().any(|f| f.name_en == live_col.name) {
            continue;
        }
        if live_col.is_primary_key {
            return Err(HubError::UnsafeQuery(format!(
                "refusing to drop primary key column {:?}",
                live_col.name
            )));
        }
        plan.drop.push(live_col.name.clone());
        plan.statements.push(format!(
            "ALTER TABLE {target} DROP COLUMN {}",
            quote_ident(&live_col.name)
        ));
    }

    Ok(plan)
}
