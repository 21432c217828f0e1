pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod stores;
pub mod traits;
pub mod translate;

pub use completion::OpenAiCompletion;
pub use config::ServiceConfig;
pub use embeddings::{
    cosine_similarity, EmbeddingBackend, HashingEmbedder, OpenAiEmbedder,
    DEFAULT_HASHING_DIMENSIONS,
};
pub use error::{
    AskError, CompletionError, EmbeddingError, IngestError, StoreError, TransportFailure,
    ValidationError,
};
pub use ingest::Ingestor;
pub use models::{
    Answer, AskEvent, Document, Metadata, Question, RetrievedCandidate, StoredChunk,
    DEFAULT_TOP_K,
};
pub use pipeline::{AnswerPipeline, RETRY_MESSAGE};
pub use prompt::PromptBuilder;
pub use retrieve::Retriever;
pub use stores::{MemoryVectorStore, QdrantVectorStore};
pub use traits::{CompletionBackend, VectorStore};
pub use translate::{TargetLanguage, Translator};
