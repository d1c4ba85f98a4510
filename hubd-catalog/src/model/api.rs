use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ident::valid_identifier;
use super::ResourceStatus;

/// A consuming application; owns a unique URL path segment and points at
/// the thematic library its interfaces read from.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiApplication {
    pub id: String,
    pub name: String,
    pub path: String,
    pub thematic_library_id: String,
    pub contact: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiApplication {
    pub name: String,
    pub path: String,
    pub thematic_library_id: String,
    pub contact: Option<String>,
}

impl CreateApiApplication {
    pub fn validate(&self) -> HubResult<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::invalid_input("name", "must not be empty"));
        }
        // Path segments share the identifier alphabet so they embed safely
        // in proxy URLs.
        if !valid_identifier(&self.path) {
            return Err(HubError::invalid_input(
                "path",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiApplication {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub status: Option<ResourceStatus>,
}

/// An exposed read endpoint: `(app.path, self.path)` resolves to one
/// thematic interface.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiInterface {
    pub id: String,
    pub api_application_id: String,
    pub thematic_interface_id: String,
    pub path: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiInterface {
    pub api_application_id: String,
    pub thematic_interface_id: String,
    pub path: String,
    pub description: Option<String>,
}

impl CreateApiInterface {
    pub fn validate(&self) -> HubResult<()> {
        if !valid_identifier(&self.path) {
            return Err(HubError::invalid_input(
                "path",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        Ok(())
    }
}

/// A bearer credential. Only the SHA-256 digest is stored; the plaintext
/// is returned exactly once at creation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_digest: String,
    pub application_ids: Vec<String>,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Usable right now: active and not past expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ResourceStatus::Active
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// Generate a fresh key: URL-safe plaintext plus its stored digest.
pub fn generate_key() -> (String, String) {
    use base64::Engine;
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let plaintext = format!(
        "hub_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    );
    let digest = digest_key(&plaintext);
    (plaintext, digest)
}

/// SHA-256 hex digest of a presented key; deterministic so the store can
/// look keys up by digest.
pub fn digest_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKey {
    pub name: String,
    pub application_ids: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateApiKey {
    pub fn validate(&self) -> HubResult<()> {
        if self.application_ids.is_empty() {
            return Err(HubError::invalid_input(
                "application_ids",
                "key must be linked to at least one application",
            ));
        }
        Ok(())
    }
}

/// Per-application or per-interface request budget.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiRateLimit {
    pub id: String,
    pub application_id: Option<String>,
    pub interface_id: Option<String>,
    pub limit_per_window: i64,
    pub window_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiRateLimit {
    pub application_id: Option<String>,
    pub interface_id: Option<String>,
    pub limit_per_window: i64,
    pub window_seconds: i64,
}

impl CreateApiRateLimit {
    pub fn validate(&self) -> HubResult<()> {
        if self.application_id.is_none() && self.interface_id.is_none() {
            return Err(HubError::invalid_input(
                "application_id",
                "either application_id or interface_id required",
            ));
        }
        if self.limit_per_window <= 0 || self.window_seconds <= 0 {
            return Err(HubError::invalid_input(
                "limit_per_window",
                "limit and window must be positive",
            ));
        }
        Ok(())
    }
}

/// One proxied request, written best-effort after completion.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiUsageLog {
    pub id: String,
    pub application_id: Option<String>,
    pub key_id: Option<String>,
    pub api_path: String,
    pub method: String,
    pub status_code: i32,
    pub duration_ms: i64,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_verify_by_digest() {
        let (plaintext, digest) = generate_key();
        assert!(plaintext.starts_with("hub_"));
        assert_eq!(digest_key(&plaintext), digest);
        assert_ne!(digest_key("hub_other"), digest);
    }

    #[test]
    fn key_usability_honors_expiry() {
        let now = chrono::Utc::now();
        let key = ApiKey {
            id: "k".into(),
            name: "ci".into(),
            key_digest: "d".into(),
            application_ids: vec!["app".into()],
            status: ResourceStatus::Active,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            created_at: now,
        };
        assert!(!key.is_usable(now));
        let fresh = ApiKey {
            expires_at: Some(now + chrono::Duration::hours(1)),
            ..key.clone()
        };
        assert!(fresh.is_usable(now));
        let disabled = ApiKey {
            status: ResourceStatus::Inactive,
            expires_at: None,
            ..key
        };
        assert!(!disabled.is_usable(now));
    }

    #[test]
    fn rate_limit_needs_a_target() {
        let req = CreateApiRateLimit {
            application_id: None,
            interface_id: None,
            limit_per_window: 10,
            window_seconds: 60,
        };
        assert!(req.validate().is_err());
    }
}
