use hubd_core::{ids, HubError, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::{
    CreateDataSource, DataSource, ResourceStatus, SourceCategory, UpdateDataSource,
};

const SOURCE_COLUMNS: &str = "id, library_id, name, category, source_type, connection_config, \
     params_config, script, script_enabled, status, is_resident, created_at";

impl PgCatalog {
    pub async fn create_data_source(&self, req: CreateDataSource) -> HubResult<DataSource> {
        req.validate()?;
        // Fail early when the parent library is gone.
        self.get_basic_library(&req.library_id).await?;
        let source = DataSource {
            id: ids::new_id(),
            library_id: req.library_id,
            name: req.name,
            category: req.category,
            source_type: req.source_type,
            connection_config: normalize_map(req.connection_config),
            params_config: normalize_map(req.params_config),
            script: req.script,
            script_enabled: req.script_enabled,
            status: ResourceStatus::Active,
            is_resident: req.is_resident,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.data_sources ({SOURCE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(&source.id)
        .bind(&source.library_id)
        .bind(&source.name)
        .bind(source.category.as_str())
        .bind(&source.source_type)
        .bind(&source.connection_config)
        .bind(&source.params_config)
        .bind(&source.script)
        .bind(source.script_enabled)
        .bind(source.status.as_str())
        .bind(source.is_resident)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(source)
    }

    pub async fn get_data_source(&self, id: &str) -> HubResult<DataSource> {
        sqlx::query_as::<_, DataSource>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM hub_meta.data_sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("data source {id}")))
    }

    pub async fn update_data_source(
        &self,
        id: &str,
        req: UpdateDataSource,
    ) -> HubResult<DataSource> {
        let existing = self.get_data_source(id).await?;
        sqlx::query(
            "UPDATE hub_meta.data_sources SET name = $1, connection_config = $2, \
             params_config = $3, script = $4, script_enabled = $5, status = $6, \
             is_resident = $7 WHERE id = $8",
        )
        .bind(req.name.unwrap_or(existing.name))
        .bind(req.connection_config.map(normalize_map).unwrap_or(existing.connection_config))
        .bind(req.params_config.map(normalize_map).unwrap_or(existing.params_config))
        .bind(req.script.unwrap_or(existing.script))
        .bind(req.script_enabled.unwrap_or(existing.script_enabled))
        .bind(req.status.unwrap_or(existing.status).as_str())
        .bind(req.is_resident.unwrap_or(existing.is_resident))
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_data_source(id).await
    }

    pub async fn delete_data_source(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.data_sources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("data source {id}")));
        }
        Ok(())
    }

    pub async fn list_data_sources(
        &self,
        pageable: &Pageable,
        library_id: Option<&str>,
        category: Option<SourceCategory>,
    ) -> HubResult<Page<DataSource>> {
        let mut count =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.data_sources WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(format!(
            "SELECT {SOURCE_COLUMNS} FROM hub_meta.data_sources WHERE 1=1"
        ));
        for builder in [&mut count, &mut select] {
            if let Some(lib) = library_id {
                builder.push(" AND library_id = ").push_bind(lib.to_string());
            }
            if let Some(cat) = category {
                builder.push(" AND category = ").push_bind(cat.as_str());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<DataSource>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    /// Sources whose drivers should be running across requests.
    pub async fn list_resident_sources(&self) -> HubResult<Vec<DataSource>> {
        Ok(sqlx::query_as::<_, DataSource>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM hub_meta.data_sources \
             WHERE is_resident AND status = 'active' ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?)
    }
}

fn normalize_map(value: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::json!({})
    } else {
        value
    }
}
