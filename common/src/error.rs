use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
