use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::EmbeddingError;

/// Maps text to fixed-length unit-normalized vectors, one per input, in
/// input order. Deterministic for a fixed model version; no retries here,
/// a backend failure is fatal to the calling request.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let mag_left: f32 = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let mag_right: f32 = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if mag_left < f32::EPSILON || mag_right < f32::EPSILON {
        0.0
    } else {
        dot / (mag_left * mag_right)
    }
}

pub struct OpenAiEmbedder {
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(&format!("{}/embeddings", api_base.trim_end_matches('/')))?;
        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: "openai".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let rows = parsed
            .pointer("/data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::BackendResponse {
                backend: "openai".to_string(),
                details: "missing data array".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            let values = row
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| EmbeddingError::BackendResponse {
                    backend: "openai".to_string(),
                    details: "row without embedding".to_string(),
                })?;

            let mut vector = values
                .iter()
                .map(|value| value.as_f64().unwrap_or(0.0) as f32)
                .collect::<Vec<f32>>();
            l2_normalize(&mut vector);
            vectors.push(vector);
        }

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }

        Ok(vectors)
    }
}

/// Deterministic character-trigram hashing embedder. Used for offline
/// operation and as a substitutable fake in tests; no model backend
/// required.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

pub const DEFAULT_HASHING_DIMENSIONS: usize = 128;

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
