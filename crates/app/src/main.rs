mod auth;
mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portfolio_chat_core::{
    AnswerPipeline, CompletionBackend, EmbeddingBackend, HashingEmbedder, Ingestor,
    MemoryVectorStore, OpenAiCompletion, OpenAiEmbedder, PromptBuilder, QdrantVectorStore,
    Retriever, ServiceConfig, TargetLanguage, Translator, VectorStore,
};

use crate::auth::TokenAuthority;
use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Remote embeddings through the OpenAI-compatible API.
    Openai,
    /// Deterministic local hashing embedder, for offline runs and tests.
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Qdrant,
}

#[derive(Parser)]
#[command(name = "portfolio-chat-server", version)]
struct Cli {
    /// Bind address for the HTTP server
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Completion model
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, default_value = "1536")]
    embedding_dimensions: usize,

    #[arg(long, value_enum, default_value = "openai")]
    embedder: EmbedderKind,

    #[arg(long, value_enum, default_value = "memory")]
    store: StoreKind,

    /// Snapshot file for the memory store
    #[arg(long, default_value = "./data/chunks.json")]
    data_file: String,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "portfolio_docs")]
    qdrant_collection: String,

    /// Subject the assistant answers about
    #[arg(long, default_value = "David")]
    persona: String,

    /// Minimum cosine similarity for retrieved context
    #[arg(long, default_value = "0.25")]
    similarity_floor: f32,

    /// Default number of chunks retrieved per question
    #[arg(long, default_value = "4")]
    top_k: usize,

    #[arg(long, default_value = "600")]
    max_output_tokens: u32,

    #[arg(long, default_value = "60")]
    request_timeout_secs: u64,

    /// Pacing between streamed fragments, zero to disable
    #[arg(long, default_value = "0")]
    chunk_delay_ms: u64,

    /// Append a Hebrew translation to non-Hebrew documents at ingest
    #[arg(long, default_value_t = false)]
    bilingual_ingest: bool,

    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@example.com")]
    admin_email: String,

    #[arg(long, env = "ADMIN_PASSWORD", default_value = "change_me", hide_env_values = true)]
    admin_password: String,

    #[arg(long, env = "AUTH_SECRET", default_value = "change_me", hide_env_values = true)]
    auth_secret: String,

    #[arg(long, default_value = "portfolio-chat")]
    auth_issuer: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig {
        persona: cli.persona.clone(),
        model: cli.model.clone(),
        embedding_model: cli.embedding_model.clone(),
        embedding_dimensions: cli.embedding_dimensions,
        api_base: cli.api_base.clone(),
        default_top_k: cli.top_k,
        similarity_floor: cli.similarity_floor,
        max_output_tokens: cli.max_output_tokens,
        request_timeout: Duration::from_secs(cli.request_timeout_secs),
        chunk_delay: Duration::from_millis(cli.chunk_delay_ms),
        ..ServiceConfig::default()
    };

    let embedder: Arc<dyn EmbeddingBackend> = match cli.embedder {
        EmbedderKind::Openai => Arc::new(
            OpenAiEmbedder::new(
                &config.api_base,
                cli.api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            )
            .context("building embedding backend")?,
        ),
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
    };

    let store: Arc<dyn VectorStore> = match cli.store {
        StoreKind::Memory => {
            let store = MemoryVectorStore::open(&cli.data_file)
                .await
                .context("opening memory store snapshot")?;
            info!(chunks = store.len(), path = %cli.data_file, "memory store ready");
            Arc::new(store)
        }
        StoreKind::Qdrant => {
            let store = QdrantVectorStore::new(
                cli.qdrant_url.clone(),
                cli.qdrant_collection.clone(),
                embedder.dimensions(),
            );
            store
                .ensure_collection()
                .await
                .context("ensuring qdrant collection")?;
            Arc::new(store)
        }
    };

    let completion: Arc<dyn CompletionBackend> = Arc::new(
        OpenAiCompletion::new(
            &config.api_base,
            cli.api_key.clone(),
            config.model.clone(),
            config.request_timeout,
            config.chunk_delay,
        )
        .context("building completion backend")?,
    );
    let translator = Arc::new(Translator::new(completion.clone()));

    let mut ingestor = Ingestor::new(embedder.clone(), store.clone());
    if cli.bilingual_ingest {
        ingestor = ingestor.with_bilingual_annotation(translator.clone(), TargetLanguage::He);
    }

    let pipeline = AnswerPipeline::new(
        Retriever::new(embedder.clone(), store.clone()),
        completion.clone(),
        PromptBuilder::new(config.persona.clone()),
        config.clone(),
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
        ingestor: Arc::new(ingestor),
        translator,
        auth: Arc::new(TokenAuthority::new(
            cli.auth_secret,
            cli.auth_issuer,
            cli.admin_email,
            cli.admin_password,
        )),
    };

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %config.model,
        store = ?cli.store,
        embedder = ?cli.embedder,
        "portfolio-chat-server boot"
    );

    server::run(state, &cli.bind).await
}
