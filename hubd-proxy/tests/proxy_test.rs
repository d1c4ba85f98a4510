//! Gateway behavior against an in-memory catalog and a real downstream
//! HTTP server bound to a loopback port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::get;
use axum::Router;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::BodyExt;
use hubd_catalog::model::{digest_key, ApiKey, ApiRateLimit, ApiUsageLog, ResourceStatus};
use hubd_catalog::ShareTarget;
use hubd_core::{HubError, HubResult};
use hubd_proxy::{AccessProxy, ProxyConfig, ShareStore, TokenHolder, UsageLogger};
use tokio::sync::Mutex;

struct MemShareStore {
    keys: Vec<ApiKey>,
    targets: Vec<(String, String, ShareTarget)>,
    limit: Option<ApiRateLimit>,
    logs: Mutex<Vec<ApiUsageLog>>,
}

#[async_trait]
impl ShareStore for MemShareStore {
    async fn find_key(&self, presented: &str) -> HubResult<Option<ApiKey>> {
        let digest = digest_key(presented);
        Ok(self.keys.iter().find(|k| k.key_digest == digest).cloned())
    }

    async fn resolve(&self, app_path: &str, interface_path: &str) -> HubResult<ShareTarget> {
        self.targets
            .iter()
            .find(|(app, iface, _)| app == app_path && iface == interface_path)
            .map(|(_, _, target)| target.clone())
            .ok_or_else(|| HubError::NotFound("share target".into()))
    }

    async fn rate_limit_for(
        &self,
        _application_id: &str,
        _interface_id: &str,
    ) -> HubResult<Option<ApiRateLimit>> {
        Ok(self.limit.clone())
    }

    async fn insert_usage_log(&self, log: &ApiUsageLog) -> HubResult<()> {
        self.logs.lock().await.push(log.clone());
        Ok(())
    }
}

fn key(id: &str, plaintext: &str, apps: &[&str]) -> ApiKey {
    ApiKey {
        id: id.into(),
        name: id.into(),
        key_digest: digest_key(plaintext),
        application_ids: apps.iter().map(|a| a.to_string()).collect(),
        status: ResourceStatus::Active,
        expires_at: None,
        created_at: chrono::Utc::now(),
    }
}

/// Downstream echoing the routing profile and table so assertions can
/// see exactly what the proxy forwarded.
async fn spawn_downstream() -> String {
    let app = Router::new().route(
        "/{table}",
        get(
            |Path(table): Path<String>, headers: HeaderMap| async move {
                let profile = headers
                    .get("accept-profile")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                let auth = headers
                    .get(http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                (
                    [("x-downstream", "yes")],
                    serde_json::json!({
                        "table": table,
                        "profile": profile,
                        "authorization": auth,
                        "rows": [1, 2, 3],
                    })
                    .to_string(),
                )
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn proxy_with(
    limit: Option<ApiRateLimit>,
    downstream_url: String,
) -> (AccessProxy, Arc<MemShareStore>) {
    let store = Arc::new(MemShareStore {
        keys: vec![key("k1", "key-one", &["app-a"]), key("k2", "key-two", &["app-b"])],
        targets: vec![(
            "finance".into(),
            "ledger".into(),
            ShareTarget {
                application_id: "app-a".into(),
                interface_id: "iface-ledger".into(),
                schema: "finance_mart".into(),
                table: "ledger_entries".into(),
            },
        )],
        limit,
        logs: Mutex::new(Vec::new()),
    });
    let usage = UsageLogger::start(store.clone(), 64);
    let proxy = AccessProxy::new(
        store.clone(),
        ProxyConfig {
            downstream_url,
            timeout: Duration::from_secs(5),
        },
        TokenHolder::new(),
        usage,
    )
    .unwrap();
    (proxy, store)
}

fn auth(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    headers
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_for_logs(store: &MemShareStore, count: usize) -> Vec<ApiUsageLog> {
    for _ in 0..100 {
        let logs = store.logs.lock().await;
        if logs.len() >= count {
            return logs.clone();
        }
        drop(logs);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("usage logs never reached {count}");
}

#[tokio::test]
async fn linked_key_streams_downstream_response() {
    let downstream = spawn_downstream().await;
    let (proxy, store) = proxy_with(None, downstream).await;

    let response = proxy
        .handle(
            Method::GET,
            "finance",
            "ledger",
            Some("select=id&limit=10"),
            &auth("key-one"),
            Some("10.0.0.9".into()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-downstream").unwrap(), "yes");
    let json = body_json(response).await;
    assert_eq!(json["table"], "ledger_entries");
    assert_eq!(json["profile"], "finance_mart");
    assert_eq!(json["rows"], serde_json::json!([1, 2, 3]));

    let logs = wait_for_logs(&store, 1).await;
    assert_eq!(logs[0].status_code, 200);
    assert_eq!(logs[0].application_id.as_deref(), Some("app-a"));
    assert_eq!(logs[0].key_id.as_deref(), Some("k1"));
    assert!(logs[0].response_bytes > 0);
    assert_eq!(logs[0].ip.as_deref(), Some("10.0.0.9"));
}

#[tokio::test]
async fn auth_matrix() {
    let downstream = spawn_downstream().await;
    let (proxy, store) = proxy_with(None, downstream).await;

    // Key linked to another application.
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &auth("key-two"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // No header at all.
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &HeaderMap::new(), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown key.
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &auth("bogus"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong method announces the allowed set.
    let response = proxy
        .handle(Method::POST, "finance", "ledger", None, &auth("key-one"), None)
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(http::header::ALLOW).unwrap(), "GET, HEAD");

    // Unknown route.
    let response = proxy
        .handle(Method::GET, "finance", "nothere", None, &auth("key-one"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Every attempt left a usage record.
    let logs = wait_for_logs(&store, 5).await;
    assert_eq!(logs.len(), 5);
    assert!(logs.iter().all(|l| l.status_code != 200));
}

#[tokio::test]
async fn expired_key_is_unauthorized() {
    let downstream = spawn_downstream().await;
    let mut expired = key("k3", "old-key", &["app-a"]);
    expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    let store = Arc::new(MemShareStore {
        keys: vec![expired],
        targets: Vec::new(),
        limit: None,
        logs: Mutex::new(Vec::new()),
    });
    let usage = UsageLogger::start(store.clone(), 8);
    let proxy = AccessProxy::new(
        store,
        ProxyConfig {
            downstream_url: downstream,
            timeout: Duration::from_secs(5),
        },
        TokenHolder::new(),
        usage,
    )
    .unwrap();
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &auth("old-key"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rate_limit_turns_429() {
    let downstream = spawn_downstream().await;
    let (proxy, _) = proxy_with(
        Some(ApiRateLimit {
            id: "rl1".into(),
            application_id: Some("app-a".into()),
            interface_id: None,
            limit_per_window: 2,
            window_seconds: 3600,
        }),
        downstream,
    )
    .await;

    for _ in 0..2 {
        let response = proxy
            .handle(Method::GET, "finance", "ledger", None, &auth("key-one"), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &auth("key-one"), None)
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn downstream_errors_pass_through() {
    // Nothing is listening here: transport failure surfaces as an
    // upstream error, not a panic.
    let (proxy, _) = proxy_with(None, "http://127.0.0.1:9".into()).await;
    let response = proxy
        .handle(Method::GET, "finance", "ledger", None, &auth("key-one"), None)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
