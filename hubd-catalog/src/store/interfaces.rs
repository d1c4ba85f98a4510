use hubd_core::{ids, HubError, HubResult, Page, Pageable};
use sqlx::types::Json;

use super::PgCatalog;
use crate::model::{
    validate_fields, CreateDataInterface, CreateThematicInterface, DataInterface,
    ResourceStatus, ThematicInterface, ThematicKind, UpdateDataInterface,
    UpdateThematicInterface,
};

const IFACE_COLUMNS: &str = "id, library_id, data_source_id, name_zh, name_en, kind, \
     interface_config, parse_config, table_fields, status, created_at";

const THEMATIC_IFACE_COLUMNS: &str =
    "id, library_id, name_zh, name_en, kind, view_sql, table_fields, status, created_at";

impl PgCatalog {
    pub async fn create_data_interface(
        &self,
        req: CreateDataInterface,
    ) -> HubResult<DataInterface> {
        req.validate()?;
        self.get_basic_library(&req.library_id).await?;
        self.get_data_source(&req.data_source_id).await?;
        let iface = DataInterface {
            id: ids::new_id(),
            library_id: req.library_id,
            data_source_id: req.data_source_id,
            name_zh: req.name_zh,
            name_en: req.name_en,
            kind: req.kind,
            interface_config: req.interface_config,
            parse_config: req.parse_config,
            table_fields: Json(req.table_fields),
            status: ResourceStatus::Active,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.data_interfaces ({IFACE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(&iface.id)
        .bind(&iface.library_id)
        .bind(&iface.data_source_id)
        .bind(&iface.name_zh)
        .bind(&iface.name_en)
        .bind(iface.kind.as_str())
        .bind(&iface.interface_config)
        .bind(&iface.parse_config)
        .bind(&iface.table_fields)
        .bind(iface.status.as_str())
        .bind(iface.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => HubError::Conflict(format!(
                "interface name_en {:?} already exists in library",
                iface.name_en
            )),
            _ => e.into(),
        })?;
        Ok(iface)
    }

    pub async fn get_data_interface(&self, id: &str) -> HubResult<DataInterface> {
        sqlx::query_as::<_, DataInterface>(&format!(
            "SELECT {IFACE_COLUMNS} FROM hub_meta.data_interfaces WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("data interface {id}")))
    }

    pub async fn update_data_interface(
        &self,
        id: &str,
        req: UpdateDataInterface,
    ) -> HubResult<DataInterface> {
        let existing = self.get_data_interface(id).await?;
        if let Some(fields) = &req.table_fields {
            validate_fields(fields)?;
        }
        sqlx::query(
            "UPDATE hub_meta.data_interfaces SET name_zh = $1, interface_config = $2, \
             parse_config = $3, table_fields = $4, status = $5 WHERE id = $6",
        )
        .bind(req.name_zh.unwrap_or(existing.name_zh))
        .bind(req.interface_config.unwrap_or(existing.interface_config))
        .bind(req.parse_config.unwrap_or(existing.parse_config))
        .bind(req.table_fields.map(Json).unwrap_or(existing.table_fields))
        .bind(req.status.unwrap_or(existing.status).as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_data_interface(id).await
    }

    pub async fn delete_data_interface(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.data_interfaces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("data interface {id}")));
        }
        Ok(())
    }

    pub async fn list_data_interfaces(
        &self,
        pageable: &Pageable,
        library_id: Option<&str>,
        data_source_id: Option<&str>,
    ) -> HubResult<Page<DataInterface>> {
        let mut count =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.data_interfaces WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(format!(
            "SELECT {IFACE_COLUMNS} FROM hub_meta.data_interfaces WHERE 1=1"
        ));
        for builder in [&mut count, &mut select] {
            if let Some(lib) = library_id {
                builder.push(" AND library_id = ").push_bind(lib.to_string());
            }
            if let Some(src) = data_source_id {
                builder
                    .push(" AND data_source_id = ")
                    .push_bind(src.to_string());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<DataInterface>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    // ── Thematic interfaces ───────────────────────────────────────────────

    pub async fn create_thematic_interface(
        &self,
        req: CreateThematicInterface,
    ) -> HubResult<ThematicInterface> {
        req.validate()?;
        self.get_thematic_library(&req.library_id).await?;
        let iface = ThematicInterface {
            id: ids::new_id(),
            library_id: req.library_id,
            name_zh: req.name_zh,
            name_en: req.name_en,
            kind: req.kind,
            view_sql: req.view_sql,
            table_fields: req.table_fields.map(Json),
            status: ResourceStatus::Active,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.thematic_interfaces ({THEMATIC_IFACE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&iface.id)
        .bind(&iface.library_id)
        .bind(&iface.name_zh)
        .bind(&iface.name_en)
        .bind(iface.kind.as_str())
        .bind(&iface.view_sql)
        .bind(&iface.table_fields)
        .bind(iface.status.as_str())
        .bind(iface.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => HubError::Conflict(format!(
                "thematic interface name_en {:?} already exists in library",
                iface.name_en
            )),
            _ => e.into(),
        })?;
        Ok(iface)
    }

    pub async fn get_thematic_interface(&self, id: &str) -> HubResult<ThematicInterface> {
        sqlx::query_as::<_, ThematicInterface>(&format!(
            "SELECT {THEMATIC_IFACE_COLUMNS} FROM hub_meta.thematic_interfaces WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("thematic interface {id}")))
    }

    pub async fn update_thematic_interface(
        &self,
        id: &str,
        req: UpdateThematicInterface,
    ) -> HubResult<ThematicInterface> {
        let existing = self.get_thematic_interface(id).await?;
        if let Some(fields) = &req.table_fields {
            validate_fields(fields)?;
        }
        if existing.kind == ThematicKind::View {
            if let Some(sql) = &req.view_sql {
                if sql.trim().is_empty() {
                    return Err(HubError::invalid_input("view_sql", "must not be empty"));
                }
            }
        }
        sqlx::query(
            "UPDATE hub_meta.thematic_interfaces SET name_zh = $1, view_sql = $2, \
             table_fields = $3, status = $4 WHERE id = $5",
        )
        .bind(req.name_zh.unwrap_or(existing.name_zh))
        .bind(req.view_sql.or(existing.view_sql))
        .bind(req.table_fields.map(Json).or(existing.table_fields))
        .bind(req.status.unwrap_or(existing.status).as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_thematic_interface(id).await
    }

    pub async fn delete_thematic_interface(&self, id: &str) -> HubResult<()> {
        let result = sqlx::query("DELETE FROM hub_meta.thematic_interfaces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("thematic interface {id}")));
        }
        Ok(())
    }

    pub async fn list_thematic_interfaces(
        &self,
        pageable: &Pageable,
        library_id: Option<&str>,
    ) -> HubResult<Page<ThematicInterface>> {
        let mut count = sqlx::QueryBuilder::new(
            "SELECT COUNT(*) FROM hub_meta.thematic_interfaces WHERE 1=1",
        );
        let mut select = sqlx::QueryBuilder::new(format!(
            "SELECT {THEMATIC_IFACE_COLUMNS} FROM hub_meta.thematic_interfaces WHERE 1=1"
        ));
        for builder in [&mut count, &mut select] {
            if let Some(lib) = library_id {
                builder.push(" AND library_id = ").push_bind(lib.to_string());
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select
            .build_query_as::<ThematicInterface>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }
}
