use std::sync::Arc;

use crate::embeddings::EmbeddingBackend;
use crate::error::AskError;
use crate::models::RetrievedCandidate;
use crate::traits::VectorStore;

/// Similarity-gated retrieval: embed the question, take the store's
/// top-k, drop everything under the floor. Survivors keep the store's
/// best-first order.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Zero survivors is a valid outcome; the pipeline turns it into the
    /// fallback path, not an error.
    pub async fn retrieve(
        &self,
        question_text: &str,
        top_k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<RetrievedCandidate>, AskError> {
        let vectors = self.embedder.embed(&[question_text.to_string()]).await?;
        let Some(vector) = vectors.first() else {
            return Ok(Vec::new());
        };

        let hits = self.store.query(vector, top_k).await?;

        let survivors = hits
            .into_iter()
            .map(|(chunk, distance)| RetrievedCandidate {
                text: chunk.text,
                metadata: chunk.metadata,
                similarity: 1.0 - distance,
            })
            .filter(|candidate| candidate.similarity >= similarity_floor)
            .collect::<Vec<_>>();

        tracing::debug!(
            top_k,
            similarity_floor,
            survivors = survivors.len(),
            "retrieval complete"
        );

        Ok(survivors)
    }
}
