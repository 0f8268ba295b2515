use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    auth::{AuthVerifier, BypassAuth, DenyAllAuth},
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider, rate_limit::TenantRateLimiter},
};
use event_bus::EventBus;
use ingest_manager::IngestJobManager;
use rag_pipeline::{ChatProvider, ConversationalRagService, RagService};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: Arc<AppConfig>,
    pub rag: Arc<RagService>,
    pub conversational: Arc<ConversationalRagService>,
    pub jobs: Arc<IngestJobManager>,
    pub bus: Arc<EventBus>,
    pub auth: Arc<dyn AuthVerifier>,
    pub limiter: TenantRateLimiter,
}

impl ApiState {
    /// Wires the service graph from configuration: providers are chosen
    /// once here and treated as immutable afterwards.
    pub fn build(
        config: Arc<AppConfig>,
        db: Arc<SurrealDbClient>,
        bus: Arc<EventBus>,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        let embedder = Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone())?);
        let chat = Arc::new(ChatProvider::from_config(&config, openai_client)?);

        let rag = Arc::new(RagService::new(
            Arc::clone(&db),
            Arc::clone(&embedder),
            Arc::clone(&chat),
            Arc::clone(&config),
        ));
        let conversational = Arc::new(ConversationalRagService::new(
            Arc::clone(&db),
            embedder,
            chat,
            Arc::clone(&config),
        ));
        let jobs = Arc::new(IngestJobManager::new(
            Arc::clone(&db),
            Arc::clone(&rag),
            Arc::clone(&bus),
            &config,
        ));

        let auth: Arc<dyn AuthVerifier> = if config.bypass_auth {
            Arc::new(BypassAuth)
        } else {
            Arc::new(DenyAllAuth)
        };

        Ok(Self {
            db,
            config,
            rag,
            conversational,
            jobs,
            bus,
            auth,
            limiter: TenantRateLimiter::in_memory(),
        })
    }
}
