use hubd_core::{ids, HubError, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::{
    digest_key, generate_key, ApiApplication, ApiInterface, ApiKey, ApiRateLimit, ApiUsageLog,
    CreateApiApplication, CreateApiInterface, CreateApiKey, CreateApiRateLimit, ResourceStatus,
    UpdateApiApplication,
};

const APP_COLUMNS: &str = "id, name, path, thematic_library_id, contact, status, created_at";
const API_IFACE_COLUMNS: &str =
    "id, api_application_id, thematic_interface_id, path, description, status, created_at";
const KEY_COLUMNS: &str =
    "id, name, key_digest, application_ids, status, expires_at, created_at";

/// Everything the proxy needs to route one request, resolved in one pass.
#[derive(Debug, Clone)]
pub struct ShareTarget {
    pub application_id: String,
    pub interface_id: String,
    /// Physical schema: the owning thematic library's `name_en`.
    pub schema: String,
    /// Physical table/view: the thematic interface's `name_en`.
    pub table: String,
}

impl PgCatalog {
    pub async fn create_api_application(
        &self,
        req: CreateApiApplication,
    ) -> HubResult<ApiApplication> {
        req.validate()?;
        self.get_thematic_library(&req.thematic_library_id).await?;
        let app = ApiApplication {
            id: ids::new_id(),
            name: req.name,
            path: req.path,
            thematic_library_id: req.thematic_library_id,
            contact: req.contact,
            status: ResourceStatus::Active,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.api_applications ({APP_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.path)
        .bind(&app.thematic_library_id)
        .bind(&app.contact)
        .bind(app.status.as_str())
        .bind(app.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                HubError::Conflict(format!("application path {:?} already exists", app.path))
            }
            _ => e.into(),
        })?;
        Ok(app)
    }

    pub async fn get_api_application(&self, id: &str) -> HubResult<ApiApplication> {
        sqlx::query_as::<_, ApiApplication>(&format!(
            "SELECT {APP_COLUMNS} FROM hub_meta.api_applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("api application {id}")))
    }

    pub async fn update_api_application(
        &self,
        id: &str,
        req: UpdateApiApplication,
    ) -> HubResult<ApiApplication> {
        let existing = self.get_api_application(id).await?;
        sqlx::query(
            "UPDATE hub_meta.api_applications SET name = $1, contact = $2, status = $3 \
             WHERE id = $4",
        )
        .bind(req.name.unwrap_or(existing.name))
        .bind(req.contact.or(existing.contact))
        .bind(req.status.unwrap_or(existing.status).as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_api_application(id).await
    }

    pub async fn delete_api_application(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.api_applications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("api application {id}")));
        }
        Ok(())
    }

    pub async fn list_api_applications(
        &self,
        pageable: &Pageable,
    ) -> HubResult<Page<ApiApplication>> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hub_meta.api_applications")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query_as::<_, ApiApplication>(&format!(
            "SELECT {APP_COLUMNS} FROM hub_meta.api_applications \
             ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    // ── API interfaces ────────────────────────────────────────────────────

    pub async fn create_api_interface(&self, req: CreateApiInterface) -> HubResult<ApiInterface> {
        req.validate()?;
        self.get_api_application(&req.api_application_id).await?;
        self.get_thematic_interface(&req.thematic_interface_id)
            .await?;
        let iface = ApiInterface {
            id: ids::new_id(),
            api_application_id: req.api_application_id,
            thematic_interface_id: req.thematic_interface_id,
            path: req.path,
            description: req.description,
            status: ResourceStatus::Active,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.api_interfaces ({API_IFACE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(&iface.id)
        .bind(&iface.api_application_id)
        .bind(&iface.thematic_interface_id)
        .bind(&iface.path)
        .bind(&iface.description)
        .bind(iface.status.as_str())
        .bind(iface.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => HubError::Conflict(format!(
                "interface path {:?} already exists on application",
                iface.path
            )),
            _ => e.into(),
        })?;
        Ok(iface)
    }

    pub async fn get_api_interface(&self, id: &str) -> HubResult<ApiInterface> {
        sqlx::query_as::<_, ApiInterface>(&format!(
            "SELECT {API_IFACE_COLUMNS} FROM hub_meta.api_interfaces WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("api interface {id}")))
    }

    pub async fn delete_api_interface(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.api_interfaces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("api interface {id}")));
        }
        Ok(())
    }

    pub async fn list_api_interfaces(
        &self,
        application_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<ApiInterface>> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM hub_meta.api_interfaces WHERE api_application_id = $1",
        )
        .bind(application_id)
        .fetch_one(&self.pool)
        .await?;
        let rows = sqlx::query_as::<_, ApiInterface>(&format!(
            "SELECT {API_IFACE_COLUMNS} FROM hub_meta.api_interfaces \
             WHERE api_application_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(application_id)
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    /// Resolve `(app_path, interface_path)` to its physical target. Only
    /// active rows on both sides participate.
    pub async fn resolve_share_target(
        &self,
        app_path: &str,
        interface_path: &str,
    ) -> HubResult<ShareTarget> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT app.id, ai.id, tl.name_en, ti.name_en \
             FROM hub_meta.api_interfaces ai \
             JOIN hub_meta.api_applications app ON app.id = ai.api_application_id \
             JOIN hub_meta.thematic_libraries tl ON tl.id = app.thematic_library_id \
             JOIN hub_meta.thematic_interfaces ti ON ti.id = ai.thematic_interface_id \
             WHERE app.path = $1 AND ai.path = $2 \
               AND app.status = 'active' AND ai.status = 'active'",
        )
        .bind(app_path)
        .bind(interface_path)
        .fetch_optional(&self.pool)
        .await?;
        let (application_id, interface_id, schema, table) = row.ok_or_else(|| {
            HubError::NotFound(format!("share target {app_path}/{interface_path}"))
        })?;
        Ok(ShareTarget {
            application_id,
            interface_id,
            schema,
            table,
        })
    }

    // ── API keys ──────────────────────────────────────────────────────────

    /// Creates a key and returns `(record, plaintext)`; the plaintext is
    /// never recoverable afterwards.
    pub async fn create_api_key(&self, req: CreateApiKey) -> HubResult<(ApiKey, String)> {
        req.validate()?;
        for app_id in &req.application_ids {
            self.get_api_application(app_id).await?;
        }
        let (plaintext, key_digest) = generate_key();
        let key = ApiKey {
            id: ids::new_id(),
            name: req.name,
            key_digest,
            application_ids: req.application_ids,
            status: ResourceStatus::Active,
            expires_at: req.expires_at,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.api_keys ({KEY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(&key.id)
        .bind(&key.name)
        .bind(&key.key_digest)
        .bind(&key.application_ids)
        .bind(key.status.as_str())
        .bind(key.expires_at)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;
        Ok((key, plaintext))
    }

    /// Constant-shape lookup by digest of the presented plaintext.
    pub async fn find_api_key(&self, presented: &str) -> HubResult<Option<ApiKey>> {
        let digest = digest_key(presented);
        Ok(sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM hub_meta.api_keys WHERE key_digest = $1"
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_api_key(&self, id: &str) -> HubResult<ApiKey> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM hub_meta.api_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("api key {id}")))
    }

    pub async fn set_api_key_status(&self, id: &str, status: ResourceStatus) -> HubResult<()> {
        let result = sqlx::query("UPDATE hub_meta.api_keys SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("api key {id}")));
        }
        Ok(())
    }

    pub async fn delete_api_key(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("api key {id}")));
        }
        Ok(())
    }

    pub async fn list_api_keys(&self, pageable: &Pageable) -> HubResult<Page<ApiKey>> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hub_meta.api_keys")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM hub_meta.api_keys ORDER BY created_at DESC \
             LIMIT $1 OFFSET $2"
        ))
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    // ── Rate limits ───────────────────────────────────────────────────────

    pub async fn create_rate_limit(&self, req: CreateApiRateLimit) -> HubResult<ApiRateLimit> {
        req.validate()?;
        let limit = ApiRateLimit {
            id: ids::new_id(),
            application_id: req.application_id,
            interface_id: req.interface_id,
            limit_per_window: req.limit_per_window,
            window_seconds: req.window_seconds,
        };
        sqlx::query(
            "INSERT INTO hub_meta.api_rate_limits \
             (id, application_id, interface_id, limit_per_window, window_seconds) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&limit.id)
        .bind(&limit.application_id)
        .bind(&limit.interface_id)
        .bind(limit.limit_per_window)
        .bind(limit.window_seconds)
        .execute(&self.pool)
        .await?;
        Ok(limit)
    }

    pub async fn delete_rate_limit(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.api_rate_limits WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("rate limit {id}")));
        }
        Ok(())
    }

    /// Narrowest matching budget: interface beats application.
    pub async fn rate_limit_for(
        &self,
        application_id: &str,
        interface_id: &str,
    ) -> HubResult<Option<ApiRateLimit>> {
        Ok(sqlx::query_as::<_, ApiRateLimit>(
            "SELECT id, application_id, interface_id, limit_per_window, window_seconds \
             FROM hub_meta.api_rate_limits \
             WHERE interface_id = $2 OR (interface_id IS NULL AND application_id = $1) \
             ORDER BY interface_id NULLS LAST LIMIT 1",
        )
        .bind(application_id)
        .bind(interface_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ── Usage logs ────────────────────────────────────────────────────────

    pub async fn insert_usage_log(&self, log: &ApiUsageLog) -> HubResult<()> {
        sqlx::query(
            "INSERT INTO hub_meta.api_usage_logs \
             (id, application_id, key_id, api_path, method, status_code, duration_ms, \
              request_bytes, response_bytes, ip, user_agent, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&log.id)
        .bind(&log.application_id)
        .bind(&log.key_id)
        .bind(&log.api_path)
        .bind(&log.method)
        .bind(log.status_code)
        .bind(log.duration_ms)
        .bind(log.request_bytes)
        .bind(log.response_bytes)
        .bind(&log.ip)
        .bind(&log.user_agent)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_usage_logs(
        &self,
        pageable: &Pageable,
        application_id: Option<&str>,
    ) -> HubResult<Page<ApiUsageLog>> {
        let mut count =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.api_usage_logs WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(
            "SELECT id, application_id, key_id, api_path, method, status_code, duration_ms, \
             request_bytes, response_bytes, ip, user_agent, error, created_at \
             FROM hub_meta.api_usage_logs WHERE 1=1",
        );
        for builder in [&mut count, &mut select] {
            if let Some(app) = application_id {
                builder
                    .push(" AND application_id = ")
                    .push_bind(app.to_string());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<ApiUsageLog>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }
}
