use chrono::Utc;
use std::sync::Arc;

use crate::embeddings::EmbeddingBackend;
use crate::error::{EmbeddingError, IngestError, ValidationError};
use crate::models::{Document, StoredChunk};
use crate::traits::VectorStore;
use crate::translate::{TargetLanguage, Translator};

/// Validates, optionally bilingual-annotates, embeds, and writes a batch
/// of documents. Batches are atomic: every item is validated before
/// anything is embedded or written, so one malformed item rejects the
/// whole batch.
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
    annotation: Option<(Arc<Translator>, TargetLanguage)>,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            annotation: None,
        }
    }

    /// Documents not written in `target`'s script get a translation
    /// appended before embedding, so questions in either language land
    /// near the same chunk.
    pub fn with_bilingual_annotation(
        mut self,
        translator: Arc<Translator>,
        target: TargetLanguage,
    ) -> Self {
        self.annotation = Some((translator, target));
        self
    }

    /// Returns the number of chunks written. Re-ingesting an existing id
    /// overwrites the stored record.
    pub async fn ingest(&self, documents: Vec<Document>) -> Result<usize, IngestError> {
        for document in &documents {
            validate(document)?;
        }

        let mut texts = Vec::with_capacity(documents.len());
        for document in &documents {
            texts.push(self.annotated_text(document).await?);
        }

        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: embeddings.len(),
            }
            .into());
        }

        let now = Utc::now();
        let chunks = documents
            .into_iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((document, text), embedding)| StoredChunk {
                id: document.id,
                text,
                embedding,
                metadata: document.metadata,
                ingested_at: now,
            })
            .collect::<Vec<_>>();

        let written = self.store.upsert(chunks).await?;
        tracing::info!(written, "ingest batch stored");
        Ok(written)
    }

    async fn annotated_text(&self, document: &Document) -> Result<String, IngestError> {
        let Some((translator, target)) = &self.annotation else {
            return Ok(document.text.clone());
        };

        if translator.is_target_script(&document.text, *target) {
            return Ok(document.text.clone());
        }

        let translated = translator.translate(&document.text, *target).await?;
        Ok(format!("{}\n\n{}", document.text, translated))
    }
}

fn validate(document: &Document) -> Result<(), ValidationError> {
    if document.id.trim().is_empty() {
        return Err(ValidationError::MissingId);
    }
    if document.text.trim().is_empty() {
        return Err(ValidationError::EmptyText {
            id: document.id.clone(),
        });
    }
    Ok(())
}
