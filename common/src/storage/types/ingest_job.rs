use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum IngestJobStatus {
    Queued,
    Processing {
        started_at: DateTime<Utc>,
    },
    Completed {
        source_id: String,
        chunk_count: usize,
        duration_ms: u64,
    },
    Failed {
        error: String,
    },
}

impl IngestJobStatus {
    /// Completed and failed jobs never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing { .. } => "processing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

stored_object!(IngestJob, "ingest_job", {
    tenant_id: String,
    user_id: String,
    title: String,
    status: IngestJobStatus
});

impl IngestJob {
    pub fn new(tenant_id: String, user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            user_id,
            title,
            status: IngestJobStatus::Queued,
        }
    }

    pub async fn create(
        db: &SurrealDbClient,
        tenant_id: String,
        user_id: String,
        title: String,
    ) -> Result<Self, AppError> {
        let job = Self::new(tenant_id, user_id, title);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    /// Records a state transition. Transitions out of a terminal state are
    /// rejected so a finished job can never change its outcome.
    pub async fn update_status(
        db: &SurrealDbClient,
        id: &str,
        status: IngestJobStatus,
    ) -> Result<(), AppError> {
        let current: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ingest job {id} not found")))?;

        if current.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "Ingest job {id} is already {}",
                current.status.label()
            )));
        }

        let _job: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Fetches a job for a requester, enforcing (tenant, user) ownership.
    pub async fn fetch_owned(
        db: &SurrealDbClient,
        job_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Self, AppError> {
        let job: Self = db
            .get_item(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

        if job.tenant_id != tenant_id || job.user_id != user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        Ok(job)
    }

    pub async fn list_for_user(
        db: &SurrealDbClient,
        tenant_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {table}
                 WHERE tenant_id = $tenant_id AND user_id = $user_id
                 ORDER BY updated_at DESC
                 LIMIT $limit",
                table = Self::table_name()
            ))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_create_starts_queued() {
        let db = test_db().await;

        let job = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "Doc1".to_string(),
        )
        .await
        .expect("create");

        assert_eq!(job.status, IngestJobStatus::Queued);

        let stored: IngestJob = db
            .get_item(&job.id)
            .await
            .expect("get")
            .expect("job exists");
        assert_eq!(stored.status, IngestJobStatus::Queued);
    }

    #[tokio::test]
    async fn test_status_progression() {
        let db = test_db().await;

        let job = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "Doc1".to_string(),
        )
        .await
        .expect("create");

        IngestJob::update_status(
            &db,
            &job.id,
            IngestJobStatus::Processing {
                started_at: Utc::now(),
            },
        )
        .await
        .expect("to processing");

        IngestJob::update_status(
            &db,
            &job.id,
            IngestJobStatus::Completed {
                source_id: "src_1".to_string(),
                chunk_count: 4,
                duration_ms: 12,
            },
        )
        .await
        .expect("to completed");

        let stored: IngestJob = db
            .get_item(&job.id)
            .await
            .expect("get")
            .expect("job exists");
        match stored.status {
            IngestJobStatus::Completed {
                source_id,
                chunk_count,
                ..
            } => {
                assert_eq!(source_id, "src_1");
                assert_eq!(chunk_count, 4);
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_transition_out_of_terminal_state() {
        let db = test_db().await;

        let job = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "Doc1".to_string(),
        )
        .await
        .expect("create");

        IngestJob::update_status(
            &db,
            &job.id,
            IngestJobStatus::Failed {
                error: "boom".to_string(),
            },
        )
        .await
        .expect("to failed");

        let result = IngestJob::update_status(
            &db,
            &job.id,
            IngestJobStatus::Processing {
                started_at: Utc::now(),
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let stored: IngestJob = db
            .get_item(&job.id)
            .await
            .expect("get")
            .expect("job exists");
        assert!(matches!(stored.status, IngestJobStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_owned_enforces_ownership() {
        let db = test_db().await;

        let job = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "Doc1".to_string(),
        )
        .await
        .expect("create");

        let owned = IngestJob::fetch_owned(&db, &job.id, "tenant_a", "user_1")
            .await
            .expect("owner fetch");
        assert_eq!(owned.id, job.id);

        let foreign_user = IngestJob::fetch_owned(&db, &job.id, "tenant_a", "user_2").await;
        assert!(matches!(foreign_user, Err(AppError::Forbidden(_))));

        let foreign_tenant = IngestJob::fetch_owned(&db, &job.id, "tenant_b", "user_1").await;
        assert!(matches!(foreign_tenant, Err(AppError::Forbidden(_))));

        let missing = IngestJob::fetch_owned(&db, "nope", "tenant_a", "user_1").await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_for_user_orders_by_update_recency() {
        let db = test_db().await;

        let first = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "First".to_string(),
        )
        .await
        .expect("create first");
        let _second = IngestJob::create(
            &db,
            "tenant_a".to_string(),
            "user_1".to_string(),
            "Second".to_string(),
        )
        .await
        .expect("create second");
        let _foreign = IngestJob::create(
            &db,
            "tenant_b".to_string(),
            "user_1".to_string(),
            "Foreign".to_string(),
        )
        .await
        .expect("create foreign");

        // Touching the first job makes it the most recently updated.
        IngestJob::update_status(
            &db,
            &first.id,
            IngestJobStatus::Processing {
                started_at: Utc::now(),
            },
        )
        .await
        .expect("touch first");

        let jobs = IngestJob::list_for_user(&db, "tenant_a", "user_1", 10)
            .await
            .expect("list");

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "First");
    }
}
