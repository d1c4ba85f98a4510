//! HTTP pull driver: templated request, pagination, JSON projection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use hubd_catalog::model::DataSource;
use hubd_core::{HubError, HubResult, Row};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::{substitute, HttpPullConfig, PaginationPolicy};
use crate::driver::{Capability, Driver, DriverStats, FetchParams, HealthProbe, RowStream, StatsCell};
use crate::retry;

const CHANNEL_CAPACITY: usize = 256;

pub struct HttpPullDriver {
    source_id: String,
    config: HttpPullConfig,
    client: reqwest::Client,
    stats: Arc<StatsCell>,
}

impl HttpPullDriver {
    pub fn new(source: &DataSource) -> HubResult<Self> {
        let config = HttpPullConfig::from_config(&source.connection_config)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HubError::driver_with("http client build failed", e))?;
        Ok(Self {
            source_id: source.id.clone(),
            config,
            client,
            stats: StatsCell::new(),
        })
    }

}

fn build_request(
    client: &reqwest::Client,
    config: &HttpPullConfig,
    url: &str,
    parameters: &serde_json::Map<String, serde_json::Value>,
) -> HubResult<reqwest::RequestBuilder> {
    let method = reqwest::Method::from_bytes(config.method.as_bytes())
        .map_err(|_| HubError::invalid_input("connection_config.method", "invalid method"))?;
    let mut request = client.request(method, url);
    for (name, value) in &config.headers {
        request = request.header(name, substitute(value, parameters));
    }
    if let Some(body) = &config.body {
        let rendered = substitute(&body.to_string(), parameters);
        let body_json: serde_json::Value = serde_json::from_str(&rendered)
            .map_err(|e| HubError::invalid_input("connection_config.body", e))?;
        request = request.json(&body_json);
    }
    Ok(request)
}

#[async_trait]
impl Driver for HttpPullDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "http_pull"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Fetch)
    }

    async fn health_check(&self) -> HealthProbe {
        let started = Instant::now();
        let result = self
            .client
            .head(&self.config.url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => {
                self.stats.touch_ok();
                HealthProbe::up(latency)
            }
            Err(e) => {
                self.stats.record_error();
                HealthProbe::down(latency, e.to_string())
            }
        }
    }

    async fn fetch(&self, params: FetchParams, cancel: CancellationToken) -> HubResult<RowStream> {
        self.stats.record_fetch();
        let parameters = params.parameters();
        let max_rows = params.max_rows();
        let base_url = substitute(&self.config.url, &parameters);
        let config = self.config.clone();
        let stats = self.stats.clone();
        let client = self.client.clone();

        let (tx, rx) = tokio::sync::mpsc::channel::<HubResult<Row>>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut page = 0u64;
            let mut cursor: Option<String> = None;
            let mut next_url: Option<String> = None;
            let mut sent = 0u64;
            'pages: loop {
                if cancel.is_cancelled() {
                    break;
                }
                let url = match page_url(&base_url, &config, page, cursor.as_deref(), &next_url) {
                    Some(url) => url,
                    None => break,
                };
                let response = retry::with_backoff(&cancel, "http_pull.request", || async {
                    let request = build_request(&client, &config, &url, &parameters)?;
                    let response = request
                        .send()
                        .await
                        .map_err(|e| HubError::driver_with("request failed", e))?;
                    response
                        .error_for_status()
                        .map_err(|e| HubError::driver_with("upstream status", e))
                })
                .await;
                let response = match response {
                    Ok(r) => r,
                    Err(e) => {
                        stats.record_error();
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                };
                let link_next = next_link(response.headers());
                let payload: serde_json::Value = match response.json().await {
                    Ok(v) => v,
                    Err(e) => {
                        stats.record_error();
                        let _ = tx
                            .send(Err(HubError::driver_with("invalid JSON payload", e)))
                            .await;
                        break;
                    }
                };

                let rows = project_rows(&payload, config.rows_path.as_deref());
                let batch_len = rows.len();
                for row in rows {
                    if cancel.is_cancelled() {
                        break 'pages;
                    }
                    sent += 1;
                    if tx.send(Ok(row)).await.is_err() {
                        break 'pages;
                    }
                    if max_rows.map(|max| sent >= max).unwrap_or(false) {
                        break 'pages;
                    }
                }
                stats.touch_ok();

                match &config.pagination {
                    PaginationPolicy::None => break,
                    PaginationPolicy::Offset { .. } => {
                        if (batch_len as u64) < config.page_size {
                            break;
                        }
                        page += 1;
                    }
                    PaginationPolicy::Cursor { cursor_path, .. } => {
                        cursor = json_path(&payload, cursor_path)
                            .and_then(|v| v.as_str())
                            .map(Into::into);
                        if cursor.is_none() {
                            break;
                        }
                    }
                    PaginationPolicy::LinkHeader => {
                        next_url = link_next;
                        if next_url.is_none() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn stats(&self) -> DriverStats {
        self.stats.snapshot(None)
    }
}

fn page_url(
    base: &str,
    config: &HttpPullConfig,
    page: u64,
    cursor: Option<&str>,
    next_url: &Option<String>,
) -> Option<String> {
    let joiner = if base.contains('?') { '&' } else { '?' };
    match &config.pagination {
        PaginationPolicy::None => (page == 0).then(|| base.to_string()),
        PaginationPolicy::Offset {
            page_param,
            size_param,
        } => Some(format!(
            "{base}{joiner}{page_param}={page}&{size_param}={}",
            config.page_size
        )),
        PaginationPolicy::Cursor { cursor_param, .. } => match (page, cursor) {
            (0, _) => Some(base.to_string()),
            (_, Some(cursor)) => Some(format!("{base}{joiner}{cursor_param}={cursor}")),
            (_, None) => None,
        },
        PaginationPolicy::LinkHeader => {
            if let Some(next) = next_url {
                Some(next.clone())
            } else {
                (page == 0).then(|| base.to_string())
            }
        }
    }
}

/// Walk a dot-separated path into a JSON document.
pub fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment)?,
        };
    }
    Some(current)
}

/// Project the response payload into rows: an array of objects at
/// `rows_path` (or the root), or a single object as one row.
pub fn project_rows(payload: &serde_json::Value, rows_path: Option<&str>) -> Vec<Row> {
    let projected = match rows_path {
        Some(path) => match json_path(payload, path) {
            Some(v) => v,
            None => return Vec::new(),
        },
        None => payload,
    };
    match projected {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        serde_json::Value::Object(map) => vec![map.clone()],
        _ => Vec::new(),
    }
}

/// Extract `rel="next"` from an RFC 5988 Link header.
fn next_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let mut pieces = part.split(';');
        let url = pieces.next()?.trim().trim_start_matches('<').trim_end_matches('>');
        for attr in pieces {
            let attr = attr.trim();
            if attr.eq_ignore_ascii_case("rel=\"next\"") || attr.eq_ignore_ascii_case("rel=next") {
                return Some(url.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_path_walks_objects_and_arrays() {
        let doc = serde_json::json!({"data": {"items": [{"v": 1}, {"v": 2}]}});
        assert_eq!(
            json_path(&doc, "data.items.1.v"),
            Some(&serde_json::json!(2))
        );
        assert!(json_path(&doc, "data.missing").is_none());
    }

    #[test]
    fn project_rows_handles_shapes() {
        let doc = serde_json::json!({"items": [{"a": 1}, {"a": 2}], "one": {"b": 3}});
        assert_eq!(project_rows(&doc, Some("items")).len(), 2);
        assert_eq!(project_rows(&doc, Some("one")).len(), 1);
        assert_eq!(project_rows(&doc, Some("items.0.a")).len(), 0);
        let root = serde_json::json!([{"a": 1}]);
        assert_eq!(project_rows(&root, None).len(), 1);
    }

    #[test]
    fn offset_urls_advance() {
        let config = HttpPullConfig::from_config(&serde_json::json!({
            "url": "https://x/api",
            "page_size": 50,
            "pagination": {"policy": "offset"}
        }))
        .unwrap();
        assert_eq!(
            page_url("https://x/api", &config, 0, None, &None).unwrap(),
            "https://x/api?page=0&size=50"
        );
        assert_eq!(
            page_url("https://x/api?q=1", &config, 2, None, &None).unwrap(),
            "https://x/api?q=1&page=2&size=50"
        );
    }
}
