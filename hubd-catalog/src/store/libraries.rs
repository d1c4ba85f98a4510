use hubd_core::{ids, HubError, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::{
    BasicLibrary, CreateBasicLibrary, CreateThematicLibrary, ResourceStatus, ThematicLibrary,
    ThematicStatus, UpdateBasicLibrary, UpdateThematicLibrary,
};

impl PgCatalog {
    pub async fn create_basic_library(&self, req: CreateBasicLibrary) -> HubResult<BasicLibrary> {
        req.validate()?;
        let lib = BasicLibrary {
            id: ids::new_id(),
            name_zh: req.name_zh,
            name_en: req.name_en,
            status: ResourceStatus::Active,
            created_at: ids::now(),
        };
        sqlx::query(
            "INSERT INTO hub_meta.basic_libraries (id, name_zh, name_en, status, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&lib.id)
        .bind(&lib.name_zh)
        .bind(&lib.name_en)
        .bind(lib.status.as_str())
        .bind(lib.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                HubError::Conflict(format!("library name_en {:?} already exists", lib.name_en))
            }
            _ => e.into(),
        })?;
        Ok(lib)
    }

    pub async fn get_basic_library(&self, id: &str) -> HubResult<BasicLibrary> {
        sqlx::query_as::<_, BasicLibrary>(
            "SELECT id, name_zh, name_en, status, created_at \
             FROM hub_meta.basic_libraries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("basic library {id}")))
    }

    pub async fn update_basic_library(
        &self,
        id: &str,
        req: UpdateBasicLibrary,
    ) -> HubResult<BasicLibrary> {
        let existing = self.get_basic_library(id).await?;
        let name_zh = req.name_zh.unwrap_or(existing.name_zh);
        let status = req.status.unwrap_or(existing.status);
        sqlx::query(
            "UPDATE hub_meta.basic_libraries SET name_zh = $1, status = $2 WHERE id = $3",
        )
        .bind(&name_zh)
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_basic_library(id).await
    }

    /// Cascades to data sources and interfaces.
    pub async fn delete_basic_library(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.basic_libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("basic library {id}")));
        }
        Ok(())
    }

    pub async fn list_basic_libraries(
        &self,
        pageable: &Pageable,
        status: Option<ResourceStatus>,
        name_like: Option<&str>,
    ) -> HubResult<Page<BasicLibrary>> {
        let mut count = sqlx::QueryBuilder::new(
            "SELECT COUNT(*) FROM hub_meta.basic_libraries WHERE 1=1",
        );
        let mut select = sqlx::QueryBuilder::new(
            "SELECT id, name_zh, name_en, status, created_at \
             FROM hub_meta.basic_libraries WHERE 1=1",
        );
        for builder in [&mut count, &mut select] {
            if let Some(status) = status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(name) = name_like {
                builder
                    .push(" AND (name_zh ILIKE ")
                    .push_bind(format!("%{name}%"))
                    .push(" OR name_en ILIKE ")
                    .push_bind(format!("%{name}%"))
                    .push(")");
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<BasicLibrary>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    // ── Thematic libraries ────────────────────────────────────────────────

    pub async fn create_thematic_library(
        &self,
        req: CreateThematicLibrary,
    ) -> HubResult<ThematicLibrary> {
        req.validate()?;
        let lib = ThematicLibrary {
            id: ids::new_id(),
            name_zh: req.name_zh,
            name_en: req.name_en,
            category: req.category,
            domain: req.domain,
            access_level: req.access_level,
            status: ThematicStatus::Draft,
            created_at: ids::now(),
        };
        sqlx::query(
            "INSERT INTO hub_meta.thematic_libraries \
             (id, name_zh, name_en, category, domain, access_level, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&lib.id)
        .bind(&lib.name_zh)
        .bind(&lib.name_en)
        .bind(&lib.category)
        .bind(&lib.domain)
        .bind(lib.access_level.as_str())
        .bind(lib.status.as_str())
        .bind(lib.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                HubError::Conflict(format!("library name_en {:?} already exists", lib.name_en))
            }
            _ => e.into(),
        })?;
        Ok(lib)
    }

    pub async fn get_thematic_library(&self, id: &str) -> HubResult<ThematicLibrary> {
        sqlx::query_as::<_, ThematicLibrary>(
            "SELECT id, name_zh, name_en, category, domain, access_level, status, created_at \
             FROM hub_meta.thematic_libraries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("thematic library {id}")))
    }

    pub async fn update_thematic_library(
        &self,
        id: &str,
        req: UpdateThematicLibrary,
    ) -> HubResult<ThematicLibrary> {
        let existing = self.get_thematic_library(id).await?;
        sqlx::query(
            "UPDATE hub_meta.thematic_libraries \
             SET name_zh = $1, category = $2, domain = $3, access_level = $4, status = $5 \
             WHERE id = $6",
        )
        .bind(req.name_zh.unwrap_or(existing.name_zh))
        .bind(req.category.unwrap_or(existing.category))
        .bind(req.domain.unwrap_or(existing.domain))
        .bind(req.access_level.unwrap_or(existing.access_level).as_str())
        .bind(req.status.unwrap_or(existing.status).as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_thematic_library(id).await
    }

    pub async fn delete_thematic_library(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.thematic_libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("thematic library {id}")));
        }
        Ok(())
    }

    pub async fn list_thematic_libraries(
        &self,
        pageable: &Pageable,
        status: Option<ThematicStatus>,
    ) -> HubResult<Page<ThematicLibrary>> {
        let mut count =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.thematic_libraries WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(
            "SELECT id, name_zh, name_en, category, domain, access_level, status, created_at \
             FROM hub_meta.thematic_libraries WHERE 1=1",
        );
        for builder in [&mut count, &mut select] {
            if let Some(status) = status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<ThematicLibrary>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }
}
