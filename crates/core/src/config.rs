use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::DEFAULT_TOP_K;

/// Tunables for the answering pipeline. The similarity floor is a
/// required operational knob: calibrate it against the embedding model's
/// score distribution rather than trusting the default blindly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Subject the assistant answers about, in the third person.
    pub persona: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub api_base: String,
    pub default_top_k: usize,
    /// Minimum cosine similarity for a retrieved chunk to be used as
    /// context. Candidates below it are dropped.
    pub similarity_floor: f32,
    /// Answers shorter than this are replaced by the fixed
    /// insufficient-information message.
    pub min_answer_chars: usize,
    pub max_output_tokens: u32,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Per-fragment pacing for streamed answers. Presentation only;
    /// zero disables it.
    #[serde(with = "duration_millis")]
    pub chunk_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            persona: "David".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            api_base: "https://api.openai.com/v1".to_string(),
            default_top_k: DEFAULT_TOP_K,
            similarity_floor: 0.25,
            min_answer_chars: 2,
            max_output_tokens: 600,
            request_timeout: Duration::from_secs(60),
            chunk_delay: Duration::ZERO,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
