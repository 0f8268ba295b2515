use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use common::{
    error::AppError,
    storage::types::{
        message::{format_history, Message},
        text_chunk::SearchHit,
    },
    utils::config::{AppConfig, LlmProvider},
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an assistant answering questions about an organization's \
documents.\n\nKey behaviors:\n\
- Always cite the retrieved snippets using [1], [2], [3] format, matching their order\n\
- Base the answer only on the retrieved snippets\n\
- If you don't have enough information, say so clearly";

const CONVERSATIONAL_SYSTEM_PROMPT: &str = "You are an assistant that helps users understand \
their organization through documents and data.\n\nKey behaviors:\n\
- Always cite sources using [1], [2], [3] format\n\
- Maintain conversation context and refer to previous exchanges when relevant\n\
- If the user asks follow-up questions, connect them to the previous discussion\n\
- Be conversational but professional\n\
- If you don't have enough information, say so clearly";

/// The active chat backend, selected once at startup.
pub enum ChatProvider {
    /// Deterministic canned answers, for tests and degraded mode.
    Stub,
    /// External chat through the OpenAI API.
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    /// Local chat through an Ollama server.
    Ollama {
        client: reqwest::Client,
        base_url: String,
        model: String,
    },
}

impl ChatProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.llm_provider {
            LlmProvider::Stub => Ok(Self::Stub),
            LlmProvider::Ollama => Ok(Self::Ollama {
                client: reqwest::Client::new(),
                base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
                model: config.ollama_model.clone(),
            }),
            LlmProvider::OpenAi => {
                let client = openai_client.ok_or_else(|| {
                    AppError::Validation(
                        "openai chat selected but no OpenAI client provided".to_string(),
                    )
                })?;
                Ok(Self::OpenAi {
                    client,
                    model: config.openai_model.clone(),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::OpenAi { .. } => "openai",
            Self::Ollama { .. } => "ollama",
        }
    }

    /// Answers a single-shot question grounded in the retrieved hits. With
    /// `rag_only` the top snippets are rendered directly and no generator
    /// is invoked.
    pub async fn answer(
        &self,
        hits: &[SearchHit],
        question: &str,
        rag_only: bool,
    ) -> Result<String, AppError> {
        if rag_only {
            return Ok(render_rag_only(hits));
        }

        match self {
            Self::Stub => Ok(stub_answer(hits, question)),
            Self::OpenAi { .. } | Self::Ollama { .. } => {
                let user_message = format!(
                    "Retrieved documents:\n{}\n\nQuestion: {question}\n\n\
                     Answer the question using the retrieved documents.",
                    render_context(hits)
                );
                self.complete(SYSTEM_PROMPT, &user_message).await
            }
        }
    }

    /// Conversational variant: the prompt carries the recent exchanges so
    /// follow-up questions stay connected to the dialogue.
    pub async fn conversational_answer(
        &self,
        hits: &[SearchHit],
        question: &str,
        history: &[Message],
        rag_only: bool,
    ) -> Result<String, AppError> {
        if rag_only {
            return Ok(render_rag_only(hits));
        }

        match self {
            Self::Stub => Ok(stub_answer(hits, question)),
            Self::OpenAi { .. } | Self::Ollama { .. } => {
                let mut user_message = String::new();
                if !history.is_empty() {
                    let recent: Vec<Message> =
                        history.iter().rev().take(4).rev().cloned().collect();
                    user_message.push_str(&format!(
                        "Recent conversation:\n{}\n\n",
                        format_history(&recent)
                    ));
                }
                user_message.push_str(&format!(
                    "Retrieved documents:\n{}\n\nCurrent question: {question}\n\n\
                     Please provide a helpful answer using the retrieved documents and \
                     conversation context.",
                    render_context(hits)
                ));
                self.complete(CONVERSATIONAL_SYSTEM_PROMPT, &user_message)
                    .await
            }
        }
    }

    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, AppError> {
        match self {
            Self::Stub => Ok(String::new()),
            Self::OpenAi { client, model } => {
                let request = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .messages([
                        ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                        ChatCompletionRequestUserMessage::from(user_message).into(),
                    ])
                    .build()?;

                let response = client.chat().create(request).await?;

                response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .ok_or_else(|| {
                        AppError::LLMParsing("No content found in chat response".into())
                    })
            }
            Self::Ollama {
                client,
                base_url,
                model,
            } => {
                #[derive(Deserialize)]
                struct OllamaMessage {
                    content: String,
                }

                #[derive(Deserialize)]
                struct OllamaChatResponse {
                    message: OllamaMessage,
                }

                let response = client
                    .post(format!("{base_url}/api/chat"))
                    .json(&json!({
                        "model": model,
                        "messages": [
                            {"role": "system", "content": system_prompt},
                            {"role": "user", "content": user_message},
                        ],
                        "stream": false,
                    }))
                    .send()
                    .await?
                    .error_for_status()?;

                let body: OllamaChatResponse = response.json().await?;
                debug!(model = %model, "ollama chat completed");
                Ok(body.message.content)
            }
        }
    }
}

/// Numbered context lines in retrieval order; the numbering is what the
/// bracketed citations refer to.
fn render_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {} (src: {})", i + 1, hit.text, hit.source))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic render of the top retrieved snippets, used in RAG-only
/// mode instead of invoking a generator.
fn render_rag_only(hits: &[SearchHit]) -> String {
    let top: Vec<String> = hits
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, hit)| format!("[{}] {} (src: {})", i + 1, hit.text, hit.source))
        .collect();

    format!(
        "RAG_ONLY mode: returning top snippets only.\n{}",
        top.join("\n")
    )
}

fn stub_answer(hits: &[SearchHit], question: &str) -> String {
    if hits.is_empty() {
        return format!("I couldn't find any relevant information for: {question}");
    }

    let lowered = question.to_lowercase();
    if lowered.contains("living twin") {
        "Based on the retrieved documents, Living Twin is an organizational AI system that \
         helps companies understand their data and align their strategies. It uses RAG \
         (Retrieval Augmented Generation) to provide intelligent answers based on company \
         documents and knowledge bases."
            .to_string()
    } else if lowered.contains("rag") {
        "RAG (Retrieval Augmented Generation) is a technique that combines document retrieval \
         with language model generation to provide more accurate and contextual responses."
            .to_string()
    } else {
        format!(
            "Based on the retrieved documents, here's what I found about '{question}': \
             see [1] for the closest match."
        )
    }
}
