use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CompletionError, StoreError};
use crate::models::StoredChunk;

/// Persists chunks and answers nearest-neighbor queries by cosine
/// distance. Upsert overwrites any chunk sharing an id; concurrent
/// queries are safe to run alongside unrelated upserts.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns the number of chunks written.
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, StoreError>;

    /// Returns up to `k` `(chunk, distance)` pairs ordered by ascending
    /// cosine distance (`1 - similarity`). Fewer than `k` when the store
    /// is smaller.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(StoredChunk, f32)>, StoreError>;
}

/// Sends (system, user) messages to a language-model backend.
///
/// `stream` yields incremental text fragments over a finite channel that
/// closes at end of stream; a fresh call is required to regenerate.
/// Either method fails only when every transport is exhausted.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, CompletionError>;

    async fn stream(
        &self,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<mpsc::Receiver<String>, CompletionError>;
}
