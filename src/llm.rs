//! Embedder & LLM Client (C3, spec §4.4 inputs): stateless wrappers over the
//! external chat-completion and embedding endpoints, with retry/backoff and
//! per-call timeouts (spec §5).

use std::future::Future;
use std::time::Duration;

use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel as _;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::error::AppResult;

/// Per-call timeouts (spec §5).
pub const TIMEOUT_ANSWER: Duration = Duration::from_secs(60);
pub const TIMEOUT_CLASSIFY: Duration = Duration::from_secs(30);
pub const TIMEOUT_EXTRACT: Duration = Duration::from_secs(3600);
pub const TIMEOUT_EMBED: Duration = Duration::from_secs(60);

const MAX_ATTEMPTS: u32 = 3;

/// Result of embedding a single (id, text) pair.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub text: String,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    // -----------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------

    pub async fn embed_chunks(&self, chunks: &[(String, String)]) -> AppResult<Vec<EmbeddedChunk>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(chunks).await,
            ref other => Err(crate::error::AppError::upstream_permanent(
                "llm",
                format!("embeddings not implemented for provider {other:?}"),
            )),
        }
    }

    pub async fn embed_query(&self, text: &str) -> AppResult<Vec<f64>> {
        let chunks = vec![("query".to_string(), text.to_string())];
        let embedded = self.embed_chunks(&chunks).await?;
        embedded
            .into_iter()
            .next()
            .map(|c| c.vector)
            .ok_or_else(|| crate::error::AppError::upstream_permanent("llm", "empty embedding response"))
    }

    async fn embed_with_openai(&self, chunks: &[(String, String)]) -> AppResult<Vec<EmbeddedChunk>> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL.to_string()
        } else {
            self.embedding_model.clone()
        };
        let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();

        let embeddings = with_retry("embed", || async {
            let client = openai::Client::from_env();
            let embedding_model = client.embedding_model(&model_name);
            timeout(TIMEOUT_EMBED, embedding_model.embed_texts(texts.clone()))
                .await
                .map_err(|_| anyhow::anyhow!("embedding call timed out"))?
                .map_err(anyhow::Error::from)
        })
        .await?;

        if embeddings.len() != chunks.len() {
            return Err(crate::error::AppError::upstream_permanent(
                "llm",
                format!(
                    "embedding count mismatch: got {} for {} inputs",
                    embeddings.len(),
                    chunks.len()
                ),
            ));
        }

        Ok(chunks
            .iter()
            .zip(embeddings.iter())
            .map(|((id, text), emb)| EmbeddedChunk {
                id: id.clone(),
                text: text.clone(),
                vector: emb.vec.clone(),
            })
            .collect())
    }

    // -----------------------------------------------------------------
    // Chat completion
    // -----------------------------------------------------------------

    /// Generic chat call: a system preamble, optional grounding context, and
    /// the user message. Used by the extractor (C4), the narrative generator
    /// (C8), and the conversation engine's intent classifier (C11).
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        context: Option<&str>,
        call_timeout: Duration,
    ) -> AppResult<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(system_prompt, user_message, context, call_timeout).await,
            ref other => Err(crate::error::AppError::upstream_permanent(
                "llm",
                format!("chat completion not implemented for provider {other:?}"),
            )),
        }
    }

    async fn complete_with_openai(
        &self,
        system_prompt: &str,
        user_message: &str,
        context: Option<&str>,
        call_timeout: Duration,
    ) -> AppResult<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini".to_string()
        } else {
            self.chat_model.clone()
        };
        let system_prompt = system_prompt.to_string();
        let user_message = user_message.to_string();
        let context = context.map(|c| c.to_string());

        with_retry("complete", || {
            let model_name = model_name.clone();
            let system_prompt = system_prompt.clone();
            let user_message = user_message.clone();
            let context = context.clone();
            async move {
                let client = openai::Client::from_env();
                let mut builder = client.agent(&model_name).preamble(&system_prompt);
                if let Some(ctx) = &context {
                    builder = builder.context(ctx);
                }
                let agent = builder.build();
                timeout(call_timeout, agent.prompt(user_message.as_str()))
                    .await
                    .map_err(|_| anyhow::anyhow!("chat completion timed out"))?
                    .map_err(anyhow::Error::from)
            }
        })
        .await
    }
}

/// Retries `f` up to `MAX_ATTEMPTS` times with exponential backoff
/// (200ms, 400ms, 800ms) on transport errors, per spec §4.4/§7.
async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS => {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                warn!(op = op_name, attempt, error = %e, "LLM call failed, retrying");
                sleep(backoff).await;
            }
            Err(e) => {
                return Err(crate::error::AppError::upstream_transient(op_name, e));
            }
        }
    }
}
