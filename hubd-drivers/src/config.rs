//! Typed views over the opaque `connection_config` maps.
//!
//! The catalog stores configs schema-free; each driver validates its own
//! subset here, failing with `ErrInvalidInput` naming the exact field.

use std::collections::BTreeMap;

use hubd_core::{HubError, HubResult};
use serde_json::Value;

fn require_str<'a>(config: &'a Value, field: &str) -> HubResult<&'a str> {
    config
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HubError::invalid_input(format!("connection_config.{field}"), "required"))
}

fn optional_str(config: &Value, field: &str) -> Option<String> {
    config
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(Into::into)
}

fn optional_u64(config: &Value, field: &str) -> Option<u64> {
    config.get(field).and_then(|v| v.as_u64())
}

/// Replace `{{name}}` placeholders from a parameter map. String values
/// have single quotes doubled so substitution inside a quoted SQL or
/// template context cannot break out of it.
pub fn substitute(template: &str, parameters: &serde_json::Map<String, Value>) -> String {
    let mut out = template.to_string();
    for (name, value) in parameters {
        let needle = format!("{{{{{name}}}}}");
        if !out.contains(&needle) {
            continue;
        }
        let rendered = match value {
            Value::String(s) => s.replace('\'', "''"),
            Value::Null => "NULL".into(),
            other => other.to_string(),
        };
        out = out.replace(&needle, &rendered);
    }
    out
}

// ── Relational ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelationalConfig {
    pub url: String,
    pub max_connections: u32,
}

impl RelationalConfig {
    pub fn from_config(source_type: &str, config: &Value) -> HubResult<Self> {
        let url = match optional_str(config, "url") {
            Some(url) => url,
            None => {
                let host = require_str(config, "host")?;
                let port = optional_u64(config, "port").unwrap_or(match source_type {
                    "mysql" => 3306,
                    _ => 5432,
                });
                let user = require_str(config, "user")?;
                let password = optional_str(config, "password").unwrap_or_default();
                let database = require_str(config, "database")?;
                let scheme = match source_type {
                    "mysql" => "mysql",
                    "postgres" => "postgres",
                    other => {
                        return Err(HubError::invalid_input(
                            "source_type",
                            format!("unsupported relational type {other:?}"),
                        ))
                    }
                };
                format!("{scheme}://{user}:{password}@{host}:{port}/{database}")
            }
        };
        Ok(Self {
            url,
            max_connections: optional_u64(config, "max_connections").unwrap_or(4) as u32,
        })
    }
}

// ── HTTP pull ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PaginationPolicy {
    None,
    /// `?{page_param}=N&{size_param}=page_size`, zero-based.
    Offset { page_param: String, size_param: String },
    /// Cursor read from the response at `cursor_path`, sent back as
    /// `?{cursor_param}=...`.
    Cursor { cursor_param: String, cursor_path: String },
    /// RFC 5988 `Link: <...>; rel="next"`.
    LinkHeader,
}

#[derive(Debug, Clone)]
pub struct HttpPullConfig {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub pagination: PaginationPolicy,
    /// Dot path to the row array inside the response JSON.
    pub rows_path: Option<String>,
    pub page_size: u64,
    pub timeout_secs: u64,
}

impl HttpPullConfig {
    pub fn from_config(config: &Value) -> HubResult<Self> {
        let url = require_str(config, "url")?.to_string();
        let method = optional_str(config, "method").unwrap_or_else(|| "GET".into());
        let headers = config
            .get("headers")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let pagination = match config
            .get("pagination")
            .and_then(|v| v.get("policy"))
            .and_then(|v| v.as_str())
            .unwrap_or("none")
        {
            "none" => PaginationPolicy::None,
            "offset" => PaginationPolicy::Offset {
                page_param: config
                    .pointer("/pagination/page_param")
                    .and_then(|v| v.as_str())
                    .unwrap_or("page")
                    .into(),
                size_param: config
                    .pointer("/pagination/size_param")
                    .and_then(|v| v.as_str())
                    .unwrap_or("size")
                    .into(),
            },
            "cursor" => PaginationPolicy::Cursor {
                cursor_param: config
                    .pointer("/pagination/cursor_param")
                    .and_then(|v| v.as_str())
                    .unwrap_or("cursor")
                    .into(),
                cursor_path: config
                    .pointer("/pagination/cursor_path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        HubError::invalid_input(
                            "connection_config.pagination.cursor_path",
                            "required for cursor pagination",
                        )
                    })?
                    .into(),
            },
            "link_header" => PaginationPolicy::LinkHeader,
            other => {
                return Err(HubError::invalid_input(
                    "connection_config.pagination.policy",
                    format!("unknown policy {other:?}"),
                ))
            }
        };
        Ok(Self {
            url,
            method,
            headers,
            body: config.get("body").cloned().filter(|b| !b.is_null()),
            pagination,
            rows_path: optional_str(config, "rows_path"),
            page_size: optional_u64(config, "page_size").unwrap_or(100),
            timeout_secs: optional_u64(config, "timeout_secs").unwrap_or(30),
        })
    }
}

// ── HTTP push ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpPushConfig {
    /// Suffix the manager registers under `/webhooks/{suffix}`.
    pub url_suffix: String,
    /// Static token compared against `X-Webhook-Token`.
    pub token: Option<String>,
    /// HMAC-SHA256 secret verified against `X-Hub-Signature`.
    pub hmac_secret: Option<String>,
    pub buffer_capacity: Option<usize>,
}

impl HttpPushConfig {
    pub fn from_config(config: &Value) -> HubResult<Self> {
        let url_suffix = require_str(config, "url_suffix")?.to_string();
        if !hubd_catalog::model::valid_identifier(&url_suffix) {
            return Err(HubError::invalid_input(
                "connection_config.url_suffix",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        Ok(Self {
            url_suffix,
            token: optional_str(config, "token"),
            hmac_secret: optional_str(config, "hmac_secret"),
            buffer_capacity: optional_u64(config, "buffer_capacity").map(|n| n as usize),
        })
    }
}

// ── Stream ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub queue: String,
    pub consumer_tag: String,
    pub staging_capacity: usize,
}

impl StreamConfig {
    pub fn from_config(config: &Value) -> HubResult<Self> {
        Ok(Self {
            url: require_str(config, "url")?.to_string(),
            queue: require_str(config, "queue")?.to_string(),
            consumer_tag: optional_str(config, "consumer_tag")
                .unwrap_or_else(|| "hubd".into()),
            staging_capacity: optional_u64(config, "staging_capacity").unwrap_or(1024) as usize,
        })
    }
}

// ── File ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// One JSON object per line.
    JsonLines,
    /// Header-led delimited text.
    Delimited(char),
}

#[derive(Debug, Clone)]
pub struct FileConfig {
    pub directory: String,
    /// Filename pattern with a single optional `*` wildcard.
    pub pattern: String,
    pub format: FileFormat,
    /// Incremental mode re-reads only bytes appended since the last scan.
    pub incremental: bool,
}

impl FileConfig {
    pub fn from_config(config: &Value) -> HubResult<Self> {
        let format = match optional_str(config, "format").as_deref().unwrap_or("jsonl") {
            "jsonl" | "json_lines" => FileFormat::JsonLines,
            "csv" => FileFormat::Delimited(','),
            "tsv" => FileFormat::Delimited('\t'),
            other => {
                return Err(HubError::invalid_input(
                    "connection_config.format",
                    format!("unknown format {other:?}"),
                ))
            }
        };
        Ok(Self {
            directory: require_str(config, "directory")?.to_string(),
            pattern: optional_str(config, "pattern").unwrap_or_else(|| "*".into()),
            format,
            incremental: config
                .get("incremental")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_and_escapes() {
        let mut params = serde_json::Map::new();
        params.insert("region".into(), serde_json::json!("e'u"));
        params.insert("min".into(), serde_json::json!(5));
        let out = substitute(
            "SELECT * FROM t WHERE region = '{{region}}' AND amt > {{min}}",
            &params,
        );
        assert_eq!(out, "SELECT * FROM t WHERE region = 'e''u' AND amt > 5");
    }

    #[test]
    fn relational_url_assembly() {
        let cfg = RelationalConfig::from_config(
            "postgres",
            &serde_json::json!({"host": "db", "user": "u", "password": "p", "database": "d"}),
        )
        .unwrap();
        assert_eq!(cfg.url, "postgres://u:p@db:5432/d");
    }

    #[test]
    fn relational_missing_field_names_path() {
        let err = RelationalConfig::from_config("postgres", &serde_json::json!({"host": "db"}))
            .unwrap_err();
        assert!(err.to_string().contains("connection_config.user"));
    }

    #[test]
    fn http_pull_cursor_requires_path() {
        let err = HttpPullConfig::from_config(&serde_json::json!({
            "url": "https://x/api",
            "pagination": {"policy": "cursor"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("cursor_path"));
    }

    #[test]
    fn push_suffix_validated() {
        assert!(HttpPushConfig::from_config(&serde_json::json!({"url_suffix": "sensor1"})).is_ok());
        assert!(
            HttpPushConfig::from_config(&serde_json::json!({"url_suffix": "Sensor/1"})).is_err()
        );
    }
}
