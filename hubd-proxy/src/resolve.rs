//! Catalog surface the proxy authenticates and routes against.

use async_trait::async_trait;
use hubd_catalog::model::{ApiKey, ApiRateLimit, ApiUsageLog};
use hubd_catalog::{PgCatalog, ShareTarget};
use hubd_core::HubResult;

#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Look up a key by the digest of the presented plaintext.
    async fn find_key(&self, presented: &str) -> HubResult<Option<ApiKey>>;

    /// Resolve `(app_path, interface_path)` to its physical target.
    async fn resolve(&self, app_path: &str, interface_path: &str) -> HubResult<ShareTarget>;

    /// Narrowest configured budget for the target, if any.
    async fn rate_limit_for(
        &self,
        application_id: &str,
        interface_id: &str,
    ) -> HubResult<Option<ApiRateLimit>>;

    async fn insert_usage_log(&self, log: &ApiUsageLog) -> HubResult<()>;
}

#[async_trait]
impl ShareStore for PgCatalog {
    async fn find_key(&self, presented: &str) -> HubResult<Option<ApiKey>> {
        self.find_api_key(presented).await
    }

    async fn resolve(&self, app_path: &str, interface_path: &str) -> HubResult<ShareTarget> {
        self.resolve_share_target(app_path, interface_path).await
    }

    async fn rate_limit_for(
        &self,
        application_id: &str,
        interface_id: &str,
    ) -> HubResult<Option<ApiRateLimit>> {
        PgCatalog::rate_limit_for(self, application_id, interface_id).await
    }

    async fn insert_usage_log(&self, log: &ApiUsageLog) -> HubResult<()> {
        PgCatalog::insert_usage_log(self, log).await
    }
}
