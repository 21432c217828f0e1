use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::models::{Metadata, StoredChunk};
use crate::traits::VectorStore;

/// Qdrant-backed store over its HTTP API. Point ids are derived
/// deterministically from the caller-assigned string id, so re-ingesting
/// the same id overwrites the existing point.
pub struct QdrantVectorStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantVectorStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Creates the collection with cosine distance if it does not exist.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" },
            }))
            .send()
            .await?;

        // 409 means the collection already exists.
        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            Ok(())
        } else {
            Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: status.to_string(),
            })
        }
    }
}

fn point_id(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap_or_default())
}

fn payload_metadata(payload: &Value) -> Metadata {
    payload
        .pointer("/metadata")
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|text| (key.clone(), text.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                if chunk.embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        got: chunk.embedding.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(&chunk.id),
                    "vector": chunk.embedding,
                    "payload": {
                        "id": chunk.id,
                        "text": chunk.text,
                        "metadata": chunk.metadata,
                        "ingested_at": chunk.ingested_at.to_rfc3339(),
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(chunks.len())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(StoredChunk, f32)>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                got: vector.len(),
            });
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
            let id = payload
                .pointer("/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let text = payload
                .pointer("/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let ingested_at = payload
                .pointer("/ingested_at")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let embedding = hit
                .pointer("/vector")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .map(|value| value.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .unwrap_or_default();

            // Qdrant reports cosine similarity for cosine collections.
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

            result.push((
                StoredChunk {
                    id,
                    text,
                    embedding,
                    metadata: payload_metadata(&payload),
                    ingested_at,
                },
                1.0 - score,
            ));
        }

        Ok(result)
    }
}
