//! Downstream store token holder with scheduled refresh.
//!
//! The refresh loop runs on its own timer, independent of request
//! context. A failed refresh degrades to the previously held token; once
//! that expires downstream calls start failing and surface as 500s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubd_core::{HubError, HubResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> HubResult<String>;
}

/// Password grant against a token endpoint returning
/// `{"token": "..."}` or `{"access_token": "..."}`.
pub struct PasswordTokenSource {
    client: reqwest::Client,
    auth_url: String,
    username: String,
    password: String,
}

impl PasswordTokenSource {
    pub fn new(auth_url: String, username: String, password: String) -> HubResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| HubError::internal(e.to_string()))?,
            auth_url,
            username,
            password,
        })
    }
}

#[async_trait]
impl TokenSource for PasswordTokenSource {
    async fn fetch(&self) -> HubResult<String> {
        let response = self
            .client
            .post(&self.auth_url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?
            .error_for_status()?;
        let payload: serde_json::Value = response.json().await?;
        payload
            .get("token")
            .or_else(|| payload.get("access_token"))
            .and_then(|v| v.as_str())
            .map(Into::into)
            .ok_or_else(|| {
                HubError::Upstream {
                    status: 500,
                    message: "token endpoint returned no token".into(),
                }
            })
    }
}

#[derive(Default)]
pub struct TokenHolder {
    token: RwLock<Option<String>>,
}

impl TokenHolder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn current(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn set(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    /// Run the refresh loop until cancelled. The first fetch happens
    /// immediately so the proxy does not start cold.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn TokenSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let holder = self.clone();
        tokio::spawn(async move {
            loop {
                match source.fetch().await {
                    Ok(token) => {
                        holder.set(token).await;
                        tracing::debug!("downstream token refreshed");
                    }
                    Err(e) => {
                        // Keep serving with the previous token until expiry.
                        tracing::warn!(error = %e, "downstream token refresh failed");
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: AtomicU32,
        fail_after: u32,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> HubResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                Err(HubError::Upstream {
                    status: 503,
                    message: "auth down".into(),
                })
            } else {
                Ok(format!("token-{call}"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_previous_token_on_failure() {
        let holder = TokenHolder::new();
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            fail_after: 1,
        });
        let cancel = CancellationToken::new();
        holder.spawn_refresh(source, Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(holder.current().await.as_deref(), Some("token-0"));

        // Next refresh fails; the held token survives.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(holder.current().await.as_deref(), Some("token-0"));
        cancel.cancel();
    }
}
