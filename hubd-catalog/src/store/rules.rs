use hubd_core::{ids, HubError, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::{CreateRule, QualityReport, Rule, RuleKind, UpdateRule};

const RULE_COLUMNS: &str = "id, name, kind, rule_type, logic, parameters, is_builtin, \
     is_enabled, version, object_type, object_id, created_at";

impl PgCatalog {
    pub async fn create_rule(&self, req: CreateRule) -> HubResult<Rule> {
        req.validate()?;
        let rule = Rule {
            id: ids::new_id(),
            name: req.name,
            kind: req.kind,
            rule_type: req.rule_type,
            logic: req.logic,
            parameters: req.parameters,
            is_builtin: false,
            is_enabled: req.is_enabled.unwrap_or(true),
            version: 1,
            object_type: req.object_type,
            object_id: req.object_id,
            created_at: ids::now(),
        };
        sqlx::query(&format!(
            "INSERT INTO hub_meta.rules ({RULE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(rule.kind.as_str())
        .bind(&rule.rule_type)
        .bind(&rule.logic)
        .bind(&rule.parameters)
        .bind(rule.is_builtin)
        .bind(rule.is_enabled)
        .bind(rule.version)
        .bind(&rule.object_type)
        .bind(&rule.object_id)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(rule)
    }

    pub async fn get_rule(&self, id: &str) -> HubResult<Rule> {
        sqlx::query_as::<_, Rule>(&format!(
            "SELECT {RULE_COLUMNS} FROM hub_meta.rules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("rule {id}")))
    }

    /// Version bumps on every change so engines can invalidate caches.
    pub async fn update_rule(&self, id: &str, req: UpdateRule) -> HubResult<Rule> {
        let existing = self.get_rule(id).await?;
        if existing.is_builtin && (req.logic.is_some() || req.parameters.is_some()) {
            return Err(HubError::Conflict(format!(
                "builtin rule {id} logic is immutable"
            )));
        }
        sqlx::query(
            "UPDATE hub_meta.rules SET name = $1, logic = $2, parameters = $3, \
             is_enabled = $4, version = version + 1 WHERE id = $5",
        )
        .bind(req.name.unwrap_or(existing.name))
        .bind(req.logic.unwrap_or(existing.logic))
        .bind(req.parameters.unwrap_or(existing.parameters))
        .bind(req.is_enabled.unwrap_or(existing.is_enabled))
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_rule(id).await
    }

    pub async fn delete_rule(&self, id: &str) -> HubResult<()> {
        let existing = self.get_rule(id).await?;
        if existing.is_builtin {
            return Err(HubError::Conflict(format!("builtin rule {id} cannot be deleted")));
        }
        sqlx::query("DELETE FROM hub_meta.rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_rules(
        &self,
        pageable: &Pageable,
        kind: Option<RuleKind>,
        enabled_only: bool,
    ) -> HubResult<Page<Rule>> {
        let mut count = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM hub_meta.rules WHERE 1=1");
        let mut select = sqlx::QueryBuilder::new(format!(
            "SELECT {RULE_COLUMNS} FROM hub_meta.rules WHERE 1=1"
        ));
        for builder in [&mut count, &mut select] {
            if let Some(kind) = kind {
                builder.push(" AND kind = ").push_bind(kind.as_str());
            }
            if enabled_only {
                builder.push(" AND is_enabled");
            }
        }
        let total: (i64,) = count.build_query_as().fetch_one(&self.pool).await?;
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(pageable.clamped_size() as i64)
            .push(" OFFSET ")
            .push_bind(pageable.offset() as i64);
        let rows = select.build_query_as::<Rule>().fetch_all(&self.pool).await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    /// Enabled rules bound to one object (or unbound globals).
    pub async fn rules_for_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> HubResult<Vec<Rule>> {
        Ok(sqlx::query_as::<_, Rule>(&format!(
            "SELECT {RULE_COLUMNS} FROM hub_meta.rules WHERE is_enabled AND \
             (object_id IS NULL OR (object_type = $1 AND object_id = $2)) \
             ORDER BY created_at"
        ))
        .bind(object_type)
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn insert_quality_report(&self, report: &QualityReport) -> HubResult<()> {
        sqlx::query(
            "INSERT INTO hub_meta.quality_reports \
             (id, object_type, object_id, quality_score, metrics, issues, recommendations, generated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&report.id)
        .bind(&report.object_type)
        .bind(&report.object_id)
        .bind(report.quality_score)
        .bind(&report.metrics)
        .bind(&report.issues)
        .bind(&report.recommendations)
        .bind(report.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_quality_reports(
        &self,
        object_id: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<QualityReport>> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM hub_meta.quality_reports WHERE object_id = $1")
                .bind(object_id)
                .fetch_one(&self.pool)
                .await?;
        let rows = sqlx::query_as::<_, QualityReport>(
            "SELECT id, object_type, object_id, quality_score, metrics, issues, \
             recommendations, generated_at FROM hub_meta.quality_reports \
             WHERE object_id = $1 ORDER BY generated_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(object_id)
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }
}
