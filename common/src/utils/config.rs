use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::authz::TenantLimits;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
    Stub,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    // Vector/graph store connection
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_vector_index_name")]
    pub vector_index_name: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // Feature flags and runtime toggles
    #[serde(default)]
    pub bypass_auth: bool,
    #[serde(default)]
    pub rag_only: bool,
    #[serde(default)]
    pub async_ingest: bool,
    #[serde(default)]
    pub local_embeddings: bool,
    #[serde(default)]
    pub use_local_mock: bool,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProvider,

    // OpenAI
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_embedding_model")]
    pub openai_embedding_model: String,
    #[serde(default = "default_openai_embedding_dimensions")]
    pub openai_embedding_dimensions: usize,

    // Local embeddings
    #[serde(default = "default_local_embedding_dimensions")]
    pub local_embedding_dimensions: usize,

    // Ollama
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    // CORS
    #[serde(default = "default_allow_cors")]
    pub allow_cors: bool,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    // Async ingest worker pool
    #[serde(default = "default_ingest_worker_pool_size")]
    pub ingest_worker_pool_size: usize,

    // Event bus
    #[serde(default = "default_event_worker_tenants")]
    pub event_worker_tenants: Vec<String>,
    #[serde(default = "default_event_max_delivery_attempts")]
    pub event_max_delivery_attempts: u32,
    #[serde(default = "default_event_max_in_flight")]
    pub event_max_in_flight: usize,

    // Per-tenant rate limits
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,
    #[serde(default = "default_rate_limit_per_day")]
    pub rate_limit_per_day: u32,
    #[serde(default = "default_edge_burst_per_minute")]
    pub edge_burst_per_minute: u32,

    // Outbound I/O deadlines, in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_model_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_store_read_timeout_secs")]
    pub store_read_timeout_secs: u64,
    #[serde(default = "default_store_write_timeout_secs")]
    pub store_write_timeout_secs: u64,

    // Per-tenant limit overrides, keyed by tenant id
    #[serde(default)]
    pub tenant_limit_overrides: HashMap<String, TenantLimits>,
}

impl AppConfig {
    /// Dimensionality of the active embedder; the vector index is sized
    /// from this at startup.
    pub fn embedding_dimensions(&self) -> usize {
        if self.local_embeddings {
            self.local_embedding_dimensions
        } else {
            self.openai_embedding_dimensions
        }
    }

    /// RAG-only answering is forced when the stub chat model is selected.
    pub fn effective_rag_only(&self) -> bool {
        self.rag_only || self.llm_provider == LlmProvider::Stub
    }
}

fn default_vector_index_name() -> String {
    "idx_chunk_embedding".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::OpenAi
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4".to_string()
}

fn default_openai_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_openai_embedding_dimensions() -> usize {
    1536
}

fn default_local_embedding_dimensions() -> usize {
    384
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama2".to_string()
}

fn default_allow_cors() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

fn default_ingest_worker_pool_size() -> usize {
    10
}

fn default_event_worker_tenants() -> Vec<String> {
    vec!["demo".to_string()]
}

fn default_event_max_delivery_attempts() -> u32 {
    5
}

fn default_event_max_in_flight() -> usize {
    10
}

fn default_rate_limit_per_minute() -> u32 {
    100
}

fn default_rate_limit_per_hour() -> u32 {
    1000
}

fn default_rate_limit_per_day() -> u32 {
    10000
}

fn default_edge_burst_per_minute() -> u32 {
    60
}

fn default_model_timeout_secs() -> u64 {
    30
}

fn default_store_read_timeout_secs() -> u64 {
    10
}

fn default_store_write_timeout_secs() -> u64 {
    60
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "dev".to_string(),
            surrealdb_database: "dev".to_string(),
            vector_index_name: default_vector_index_name(),
            http_port: default_http_port(),
            bypass_auth: false,
            rag_only: false,
            async_ingest: false,
            local_embeddings: false,
            use_local_mock: false,
            llm_provider: default_llm_provider(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            openai_embedding_model: default_openai_embedding_model(),
            openai_embedding_dimensions: default_openai_embedding_dimensions(),
            local_embedding_dimensions: default_local_embedding_dimensions(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
            allow_cors: default_allow_cors(),
            cors_origins: default_cors_origins(),
            ingest_worker_pool_size: default_ingest_worker_pool_size(),
            event_worker_tenants: default_event_worker_tenants(),
            event_max_delivery_attempts: default_event_max_delivery_attempts(),
            event_max_in_flight: default_event_max_in_flight(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            rate_limit_per_hour: default_rate_limit_per_hour(),
            rate_limit_per_day: default_rate_limit_per_day(),
            edge_burst_per_minute: default_edge_burst_per_minute(),
            embed_timeout_secs: default_model_timeout_secs(),
            chat_timeout_secs: default_model_timeout_secs(),
            store_read_timeout_secs: default_store_read_timeout_secs(),
            store_write_timeout_secs: default_store_write_timeout_secs(),
            tenant_limit_overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_dimensions_follow_embedder_selection() {
        let mut config = AppConfig::default();
        assert_eq!(config.embedding_dimensions(), 1536);

        config.local_embeddings = true;
        assert_eq!(config.embedding_dimensions(), 384);
    }

    #[test]
    fn stub_provider_forces_rag_only() {
        let mut config = AppConfig::default();
        assert!(!config.effective_rag_only());

        config.llm_provider = LlmProvider::Stub;
        assert!(config.effective_rag_only());

        config.llm_provider = LlmProvider::OpenAi;
        config.rag_only = true;
        assert!(config.effective_rag_only());
    }
}
