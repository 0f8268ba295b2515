use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::error::AppError;

use super::config::AppConfig;

/// The active embedding backend, selected once at startup. Every vector a
/// provider instance returns has the same dimensionality.
pub enum EmbeddingProvider {
    /// External embeddings through the OpenAI API.
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: usize,
    },
    /// Deterministic feature-hashed embeddings. The local backend: fully
    /// offline, and what the test suite runs against.
    Hashed { dimensions: usize },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        if config.local_embeddings {
            return Ok(Self::new_hashed(config.local_embedding_dimensions));
        }

        let client = openai_client.ok_or_else(|| {
            AppError::Validation(
                "external embeddings selected but no OpenAI client provided".to_string(),
            )
        })?;

        Ok(Self::OpenAi {
            client,
            model: config.openai_embedding_model.clone(),
            dimensions: config.openai_embedding_dimensions,
        })
    }

    pub fn new_hashed(dimensions: usize) -> Self {
        Self::Hashed { dimensions }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimensions, .. } | Self::Hashed { dimensions } => *dimensions,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Hashed { .. } => "hashed",
        }
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Self::Hashed { dimensions } => Ok(hashed_embedding(text, *dimensions)),
            Self::OpenAi { .. } => {
                let mut vectors = self.embed_batch(&[text.to_string()]).await?;
                vectors
                    .pop()
                    .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
            }
        }
    }

    /// Embed a batch of texts, preserving input order. The whole batch
    /// succeeds or the call fails; partial results are never returned.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self {
            Self::Hashed { dimensions } => Ok(texts
                .iter()
                .map(|t| hashed_embedding(t, *dimensions))
                .collect()),
            Self::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

                let response = Retry::spawn(retry_strategy, || async {
                    let request = CreateEmbeddingRequestArgs::default()
                        .model(model.clone())
                        .dimensions(*dimensions as u32)
                        .input(texts.to_vec())
                        .build()?;

                    client
                        .embeddings()
                        .create(request)
                        .await
                        .map_err(AppError::OpenAI)
                })
                .await?;

                if response.data.len() != texts.len() {
                    return Err(AppError::LLMParsing(format!(
                        "embedding batch returned {} vectors for {} inputs",
                        response.data.len(),
                        texts.len()
                    )));
                }

                let mut data = response.data;
                data.sort_by_key(|d| d.index);

                debug!(
                    batch = texts.len(),
                    dimensions = dimensions,
                    "embedded batch"
                );

                Ok(data.into_iter().map(|d| d.embedding).collect())
            }
        }
    }
}

/// Deterministic bag-of-words feature hashing into a unit vector. Texts
/// sharing vocabulary land near each other under cosine similarity, which
/// is all the offline backend needs.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    if dimensions == 0 {
        return vector;
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = (fnv1a(token.to_lowercase().as_bytes()) as usize) % dimensions;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }

    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
