#![allow(clippy::missing_docs_in_private_items)]

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{
    auth::UserContext,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::ingest_job::{IngestJob, IngestJobStatus},
    },
    utils::config::AppConfig,
};
use event_bus::{DomainEvent, EventBus};
use rag_pipeline::{IngestOutcome, RagService};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub title: String,
    pub text: String,
    pub tenant_id: String,
    pub user_id: String,
}

/// What a submission produced: the finished ingest on the synchronous
/// path, or a tracked job on the asynchronous one.
#[derive(Debug)]
pub enum SubmitOutcome {
    Completed(IngestOutcome),
    Queued {
        ok: bool,
        job_id: String,
        status: &'static str,
    },
}

/// Fire-and-forget ingestion with per-job lifecycle tracking. Each job is
/// driven by exactly one worker scheduled on a bounded pool; completion
/// publishes a `DocumentIngested` event.
pub struct IngestJobManager {
    db: Arc<SurrealDbClient>,
    rag: Arc<RagService>,
    bus: Arc<EventBus>,
    pool: Arc<Semaphore>,
    async_ingest: bool,
}

impl IngestJobManager {
    pub fn new(
        db: Arc<SurrealDbClient>,
        rag: Arc<RagService>,
        bus: Arc<EventBus>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            rag,
            bus,
            pool: Arc::new(Semaphore::new(config.ingest_worker_pool_size)),
            async_ingest: config.async_ingest,
        }
    }

    /// Synchronous mode runs the ingest inline; asynchronous mode
    /// persists a queued job and hands it to a worker.
    pub async fn submit(&self, request: IngestRequest) -> Result<SubmitOutcome, AppError> {
        if !self.async_ingest {
            let outcome = self
                .rag
                .ingest_text(&request.title, &request.text, &request.tenant_id)
                .await?;
            return Ok(SubmitOutcome::Completed(outcome));
        }

        let job = IngestJob::create(
            &self.db,
            request.tenant_id.clone(),
            request.user_id.clone(),
            request.title.clone(),
        )
        .await?;
        let job_id = job.id.clone();
        info!(job_id, tenant_id = %request.tenant_id, "queued ingest job");

        let db = Arc::clone(&self.db);
        let rag = Arc::clone(&self.rag);
        let bus = Arc::clone(&self.bus);
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            run_job(&db, &rag, &bus, &job.id, &request).await;
        });

        Ok(SubmitOutcome::Queued {
            ok: true,
            job_id,
            status: "queued",
        })
    }

    /// Job status for polling; only the submitting (tenant, user) may see it.
    pub async fn get_job(
        &self,
        job_id: &str,
        requester: &UserContext,
    ) -> Result<IngestJob, AppError> {
        IngestJob::fetch_owned(&self.db, job_id, &requester.tenant_id, &requester.uid).await
    }

    pub async fn list_jobs(
        &self,
        requester: &UserContext,
        limit: usize,
    ) -> Result<Vec<IngestJob>, AppError> {
        IngestJob::list_for_user(&self.db, &requester.tenant_id, &requester.uid, limit).await
    }
}

/// The single worker for one job: drives the state machine to a terminal
/// state and never lets a failure escape the worker.
async fn run_job(
    db: &SurrealDbClient,
    rag: &RagService,
    bus: &EventBus,
    job_id: &str,
    request: &IngestRequest,
) {
    if let Err(err) = IngestJob::update_status(
        db,
        job_id,
        IngestJobStatus::Processing {
            started_at: Utc::now(),
        },
    )
    .await
    {
        error!(job_id, error = %err, "failed to mark job processing");
        return;
    }

    let started = Instant::now();
    match rag
        .ingest_text(&request.title, &request.text, &request.tenant_id)
        .await
    {
        Ok(outcome) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            if let Err(err) = IngestJob::update_status(
                db,
                job_id,
                IngestJobStatus::Completed {
                    source_id: outcome.source_id.clone(),
                    chunk_count: outcome.chunks_created,
                    duration_ms,
                },
            )
            .await
            {
                error!(job_id, error = %err, "failed to mark job completed");
                return;
            }

            info!(
                job_id,
                source_id = %outcome.source_id,
                chunks = outcome.chunks_created,
                duration_ms,
                "ingest job completed"
            );

            // Event publication failure must not alter the job state.
            let event = DomainEvent::document_ingested(
                &request.tenant_id,
                &outcome.source_id,
                &request.title,
                "document",
                Some(&request.user_id),
            );
            if let Err(err) = bus.publish(&event).await {
                error!(job_id, error = %err, "failed to publish DocumentIngested event");
            }
        }
        Err(err) => {
            warn!(job_id, error = %err, "ingest job failed");
            if let Err(update_err) = IngestJob::update_status(
                db,
                job_id,
                IngestJobStatus::Failed {
                    error: err.to_string(),
                },
            )
            .await
            {
                error!(job_id, error = %update_err, "failed to mark job failed");
            }
        }
    }
}
