use hubd_core::{ids, HubResult, Page, Pageable};

use super::PgCatalog;
use crate::model::SseEventRecord;

impl PgCatalog {
    /// Persist an event; `sent = false` marks it as undelivered (no live
    /// channel existed when it was emitted).
    pub async fn insert_sse_event(
        &self,
        event_type: &str,
        user_name: Option<&str>,
        data: serde_json::Value,
        sent: bool,
    ) -> HubResult<SseEventRecord> {
        let record = SseEventRecord {
            id: ids::new_id(),
            event_type: event_type.into(),
            user_name: user_name.map(Into::into),
            data,
            created_at: ids::now(),
            sent,
            read: false,
        };
        sqlx::query(
            "INSERT INTO hub_meta.sse_events \
             (id, event_type, user_name, data, created_at, sent, read) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.id)
        .bind(&record.event_type)
        .bind(&record.user_name)
        .bind(&record.data)
        .bind(record.created_at)
        .bind(record.sent)
        .bind(record.read)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_unread_events(
        &self,
        user_name: &str,
        pageable: &Pageable,
    ) -> HubResult<Page<SseEventRecord>> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM hub_meta.sse_events \
             WHERE NOT read AND (user_name = $1 OR user_name IS NULL)",
        )
        .bind(user_name)
        .fetch_one(&self.pool)
        .await?;
        let rows = sqlx::query_as::<_, SseEventRecord>(
            "SELECT id, event_type, user_name, data, created_at, sent, read \
             FROM hub_meta.sse_events \
             WHERE NOT read AND (user_name = $1 OR user_name IS NULL) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_name)
        .bind(pageable.clamped_size() as i64)
        .bind(pageable.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, pageable, total.0 as u64))
    }

    pub async fn mark_event_read(&self, id: &str) -> HubResult<()> {
        sqlx::query("UPDATE hub_meta.sse_events SET read = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
