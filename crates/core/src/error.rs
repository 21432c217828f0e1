use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("embedding dimension {got} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("document id must not be empty")]
    MissingId,

    #[error("document '{id}' has no text")]
    EmptyText { id: String },
}

/// One transport attempt's failure reason. Kept typed so the fallback
/// decision is only ever taken on a transport fault.
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("unexpected status {status}: {details}")]
    Status { status: u16, details: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed stream event: {0}")]
    MalformedEvent(String),
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transports exhausted: primary: {primary}; fallback: {fallback}")]
    Exhausted {
        primary: TransportFailure,
        fallback: TransportFailure,
    },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("translation failed: {0}")]
    Translation(#[from] CompletionError),
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}
