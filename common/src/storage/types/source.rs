use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::DEFAULT_TENANT;

stored_object!(Source, "source", {
    tenant_id: String,
    title: String,
    chunk_count: usize
});

impl Source {
    pub fn new(tenant_id: String, title: String, chunk_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            title,
            chunk_count,
        }
    }

    /// Most recently ingested sources for a tenant, newest first.
    pub async fn recent(
        db: &SurrealDbClient,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let sources: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {table}
                 WHERE (tenant_id ?? $fallback) = $tenant
                 ORDER BY created_at DESC
                 LIMIT $limit",
                table = Self::table_name()
            ))
            .bind(("tenant", tenant_id.to_string()))
            .bind(("fallback", DEFAULT_TENANT.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_filters_by_tenant_and_orders_by_recency() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut older = Source::new("tenant_a".to_string(), "Older".to_string(), 1);
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let newer = Source::new("tenant_a".to_string(), "Newer".to_string(), 3);
        let foreign = Source::new("tenant_b".to_string(), "Foreign".to_string(), 2);

        db.store_item(older).await.expect("store older");
        db.store_item(newer).await.expect("store newer");
        db.store_item(foreign).await.expect("store foreign");

        let recent = Source::recent(&db, "tenant_a", 10).await.expect("recent");

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "Newer");
        assert_eq!(recent[1].title, "Older");
        assert_eq!(recent[0].chunk_count, 3);
    }

    #[tokio::test]
    async fn test_recent_applies_limit() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        for i in 0..5 {
            let source = Source::new("tenant_a".to_string(), format!("Doc{i}"), 1);
            db.store_item(source).await.expect("store");
        }

        let recent = Source::recent(&db, "tenant_a", 2).await.expect("recent");
        assert_eq!(recent.len(), 2);
    }
}
