use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::models::StoredChunk;
use crate::traits::VectorStore;

/// Brute-force cosine store over a `RwLock<HashMap>` keyed by chunk id,
/// with an optional JSON snapshot so a logical store survives process
/// restarts. Good for the single-node deployments this service targets;
/// swap in the Qdrant store when the corpus outgrows it.
pub struct MemoryVectorStore {
    chunks: RwLock<HashMap<String, StoredChunk>>,
    snapshot: Option<PathBuf>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Opens a store backed by a snapshot file, loading any existing
    /// snapshot at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut chunks = HashMap::new();

        if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            let loaded: Vec<StoredChunk> = serde_json::from_str(&raw)?;
            for chunk in loaded {
                chunks.insert(chunk.id.clone(), chunk);
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            chunks: RwLock::new(chunks),
            snapshot: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let encoded = {
            let guard = self
                .chunks
                .read()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            let all: Vec<&StoredChunk> = guard.values().collect();
            serde_json::to_string(&all)?
        };

        // Write-then-rename keeps the snapshot whole if we die mid-write.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, StoreError> {
        let written = chunks.len();
        {
            let mut guard = self
                .chunks
                .write()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            for chunk in chunks {
                guard.insert(chunk.id.clone(), chunk);
            }
        }
        self.persist().await?;
        Ok(written)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(StoredChunk, f32)>, StoreError> {
        let guard = self
            .chunks
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        let mut scored: Vec<(StoredChunk, f32)> = guard
            .values()
            .map(|chunk| {
                let distance = 1.0 - cosine_similarity(vector, &chunk.embedding);
                (chunk.clone(), distance)
            })
            .collect();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(k);
        Ok(scored)
    }
}
