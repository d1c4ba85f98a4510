//! The read-only gateway: resolve, authenticate, forward, stream, log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::response::Response;
use chrono::Utc;
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderName, ALLOW};
use http::{Method, StatusCode};
use hubd_catalog::model::ApiUsageLog;
use hubd_core::{HubError, HubResult};

use crate::limiter::RateLimiter;
use crate::resolve::ShareStore;
use crate::token::TokenHolder;
use crate::usage::UsageLogger;

/// Inbound headers never forwarded downstream. `Accept-Profile` /
/// `Content-Profile` are overwritten with the resolved schema, the rest
/// are credentials or hop-by-hop.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "accept-profile",
    "content-profile",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Downstream headers not replayed to the client (the body is
/// re-streamed, so framing headers would lie).
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length"];

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the downstream read store.
    pub downstream_url: String,
    pub timeout: Duration,
}

pub struct AccessProxy {
    store: Arc<dyn ShareStore>,
    client: reqwest::Client,
    config: ProxyConfig,
    token: Arc<TokenHolder>,
    limiter: RateLimiter,
    usage: UsageLogger,
}

impl AccessProxy {
    pub fn new(
        store: Arc<dyn ShareStore>,
        config: ProxyConfig,
        token: Arc<TokenHolder>,
        usage: UsageLogger,
    ) -> HubResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HubError::internal(e.to_string()))?;
        Ok(Self {
            store,
            client,
            config,
            token,
            limiter: RateLimiter::new(),
            usage,
        })
    }

    pub fn dropped_logs(&self) -> u64 {
        self.usage.dropped_count()
    }

    /// `GET|HEAD /api/v1/share/{app_path}/{interface_path}?...`
    pub async fn handle(
        &self,
        method: Method,
        app_path: &str,
        interface_path: &str,
        raw_query: Option<&str>,
        headers: &HeaderMap,
        client_ip: Option<String>,
    ) -> Response {
        let started = Instant::now();
        let mut log = ApiUsageLog {
            id: uuid::Uuid::new_v4().to_string(),
            application_id: None,
            key_id: None,
            api_path: format!("/api/v1/share/{app_path}/{interface_path}"),
            method: method.to_string(),
            status_code: 0,
            duration_ms: 0,
            request_bytes: content_length(headers),
            response_bytes: 0,
            ip: client_ip,
            user_agent: headers
                .get(http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(Into::into),
            error: None,
            created_at: Utc::now(),
        };

        // 1. Method gate.
        if method != Method::GET && method != Method::HEAD {
            let mut response = self.reject(&mut log, started, StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, http::HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        // 2-3. Bearer token and key lookup.
        let presented = match bearer_token(headers) {
            Some(token) => token,
            None => {
                return self.reject(
                    &mut log,
                    started,
                    StatusCode::UNAUTHORIZED,
                    "missing or malformed bearer token",
                )
            }
        };
        let key = match self.store.find_key(presented).await {
            Ok(Some(key)) if key.is_usable(Utc::now()) => key,
            Ok(_) => {
                return self.reject(
                    &mut log,
                    started,
                    StatusCode::UNAUTHORIZED,
                    "unknown, expired or disabled key",
                )
            }
            Err(e) => {
                return self.reject_err(&mut log, started, e);
            }
        };
        log.key_id = Some(key.id.clone());

        // 4. Route resolution.
        let target = match self.store.resolve(app_path, interface_path).await {
            Ok(target) => target,
            Err(HubError::NotFound(_)) => {
                return self.reject(&mut log, started, StatusCode::NOT_FOUND, "unknown interface")
            }
            Err(e) => return self.reject_err(&mut log, started, e),
        };
        log.application_id = Some(target.application_id.clone());

        // 5. Key must be linked to the owning application.
        if !key.application_ids.contains(&target.application_id) {
            return self.reject(
                &mut log,
                started,
                StatusCode::UNAUTHORIZED,
                "key not linked to application",
            );
        }

        // 6. Schema routing.
        if target.schema.is_empty() || target.table.is_empty() {
            return self.reject(
                &mut log,
                started,
                StatusCode::INTERNAL_SERVER_ERROR,
                "share target incompletely configured",
            );
        }

        // 7. Optional rate limit.
        match self
            .store
            .rate_limit_for(&target.application_id, &target.interface_id)
            .await
        {
            Ok(Some(limit)) => {
                if !self.limiter.try_acquire(
                    &target.application_id,
                    limit.limit_per_window as u64,
                    limit.window_seconds as u64,
                ) {
                    return self.reject(
                        &mut log,
                        started,
                        StatusCode::TOO_MANY_REQUESTS,
                        "rate limit exceeded",
                    );
                }
            }
            Ok(None) => {}
            Err(e) => return self.reject_err(&mut log, started, e),
        }

        // 8. Downstream request.
        let url = match raw_query {
            Some(query) if !query.is_empty() => {
                format!("{}/{}?{}", self.config.downstream_url, target.table, query)
            }
            _ => format!("{}/{}", self.config.downstream_url, target.table),
        };
        let downstream_headers =
            build_downstream_headers(headers, &target.schema, &method, self.token.current().await);
        let request = self
            .client
            .request(method.clone(), &url)
            .headers(downstream_headers);

        // 9. Forward and stream the body back.
        let downstream = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err: HubError = e.into();
                return self.reject_err(&mut log, started, err);
            }
        };
        let status = downstream.status();
        log.status_code = status.as_u16() as i32;

        let mut builder = Response::builder().status(status);
        for (name, value) in downstream.headers() {
            if !SKIP_RESPONSE_HEADERS.contains(&name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        // 10. The usage log is sealed when the stream is dropped, which
        // covers completion, client abort and write errors.
        let guard = LogGuard {
            usage: self.usage.clone(),
            log: Some(log),
            bytes: Arc::new(AtomicU64::new(0)),
            started,
        };
        let counter = guard.bytes.clone();
        let stream = downstream.bytes_stream().map(move |chunk| {
            let _tied_to_stream = &guard;
            if let Ok(bytes) = &chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            chunk
        });
        builder
            .body(Body::from_stream(stream))
            .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))
    }

    fn reject(
        &self,
        log: &mut ApiUsageLog,
        started: Instant,
        status: StatusCode,
        message: &str,
    ) -> Response {
        log.status_code = status.as_u16() as i32;
        log.duration_ms = started.elapsed().as_millis() as i64;
        log.error = Some(message.to_string());
        self.usage.submit(log.clone());
        error_response(status, message)
    }

    fn reject_err(&self, log: &mut ApiUsageLog, started: Instant, err: HubError) -> Response {
        let status = match &err {
            HubError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => other.http_status(),
        };
        tracing::warn!(error = %err, "proxy request failed");
        self.reject(log, started, status, &err.public_message())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("static error response")
}

/// Extract the raw token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Copy forwardable headers and inject the schema routing profile plus
/// the downstream credential.
pub fn build_downstream_headers(
    inbound: &HeaderMap,
    schema: &str,
    method: &Method,
    token: Option<String>,
) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound {
        if SKIP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    let profile_header = if *method == Method::GET || *method == Method::HEAD {
        "accept-profile"
    } else {
        "content-profile"
    };
    if let Ok(value) = http::HeaderValue::from_str(schema) {
        out.insert(HeaderName::from_static(profile_header), value);
    }
    if let Some(token) = token {
        if let Ok(value) = http::HeaderValue::from_str(&format!("Bearer {token}")) {
            out.insert(http::header::AUTHORIZATION, value);
        }
    }
    out
}

fn content_length(headers: &HeaderMap) -> i64 {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Seals and submits the usage record when the response stream ends.
struct LogGuard {
    usage: UsageLogger,
    log: Option<ApiUsageLog>,
    bytes: Arc<AtomicU64>,
    started: Instant,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(mut log) = self.log.take() {
            log.response_bytes = self.bytes.load(Ordering::Relaxed) as i64;
            log.duration_ms = self.started.elapsed().as_millis() as i64;
            self.usage.submit(log);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(http::header::AUTHORIZATION, "bearer xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(http::header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert(http::header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn downstream_headers_filter_and_profile() {
        let mut inbound = HeaderMap::new();
        inbound.insert(http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        inbound.insert(http::header::HOST, "hub.example".parse().unwrap());
        inbound.insert("accept-profile", "spoofed".parse().unwrap());
        inbound.insert("x-request-id", "r-1".parse().unwrap());
        inbound.insert(http::header::ACCEPT, "application/json".parse().unwrap());

        let out = build_downstream_headers(&inbound, "finance", &Method::GET, None);
        assert!(out.get(http::header::AUTHORIZATION).is_none());
        assert!(out.get(http::header::HOST).is_none());
        assert_eq!(out.get("accept-profile").unwrap(), "finance");
        assert!(out.get("content-profile").is_none());
        assert_eq!(out.get("x-request-id").unwrap(), "r-1");
        assert_eq!(out.get(http::header::ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn downstream_token_is_injected() {
        let out = build_downstream_headers(
            &HeaderMap::new(),
            "finance",
            &Method::GET,
            Some("store-token".into()),
        );
        assert_eq!(
            out.get(http::header::AUTHORIZATION).unwrap(),
            "Bearer store-token"
        );
    }
}
