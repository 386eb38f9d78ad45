//! Application configuration: Neo4j, LLM/embedding, upstream document
//! platform, object storage, and conversation session TTL (spec §6
//! "Environment inputs").

use std::env;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("unsupported LLM provider: {other}")),
        }
    }
}

/// Coordinates for the upstream document platform's relational DB and
/// object storage (spec §1 Out of Scope — contract-only; the adapters built
/// against this repo use an in-memory stand-in unless these are set).
#[derive(Clone, Debug, Default)]
pub struct UpstreamConfig {
    pub db_url: Option<String>,
    pub object_store_endpoint: Option<String>,
    pub object_store_key: Option<String>,
    pub object_store_secret: Option<String>,
    pub object_store_bucket: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_dim: usize,

    pub upstream: UpstreamConfig,
    pub data_dir: String,
    pub session_ttl_secs: i64,

    /// RRF fusion constant K (spec §4.5). Configurable for experimentation;
    /// defaults to the spec's 60.
    pub rrf_k: f64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI").map_err(|_| anyhow!("missing NEO4J_URI"))?;
        let neo4j_user = env::var("NEO4J_USER").map_err(|_| anyhow!("missing NEO4J_USER"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD").map_err(|_| anyhow!("missing NEO4J_PASSWORD"))?;

        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model =
            env::var("LLM_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model = env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let embedding_dim = env::var("EMBEDDING_DIM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1536);

        let upstream = UpstreamConfig {
            db_url: env::var("UPSTREAM_DB_URL").ok(),
            object_store_endpoint: env::var("OBJECT_STORE_ENDPOINT").ok(),
            object_store_key: env::var("OBJECT_STORE_KEY").ok(),
            object_store_secret: env::var("OBJECT_STORE_SECRET").ok(),
            object_store_bucket: env::var("OBJECT_STORE_BUCKET").ok(),
        };

        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let session_ttl_secs = env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let rrf_k = env::var("RRF_K").ok().and_then(|v| v.parse().ok()).unwrap_or(60.0);

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            embedding_dim,
            upstream,
            data_dir,
            session_ttl_secs,
            rrf_k,
        })
    }
}
