use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TOP_K: usize = 4;

pub type Metadata = BTreeMap<String, String>;

/// A caller-supplied document. Re-ingesting the same id overwrites the
/// prior record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default, alias = "meta")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

/// Transient per-query retrieval result; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedCandidate {
    pub text: String,
    pub metadata: Metadata,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Metadata>,
}

/// Wire event for the streaming ask boundary. Serializes as
/// `{"type":"chunk","data":"..."}` and friends; a stream is zero or more
/// chunks followed by exactly one `sources` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AskEvent {
    Chunk(String),
    Sources(Vec<Metadata>),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_defaults_top_k() {
        let question: Question = serde_json::from_str(r#"{"text":"who is david"}"#).unwrap();
        assert_eq!(question.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn ingest_item_accepts_meta_alias() {
        let doc: Document =
            serde_json::from_str(r#"{"id":"d1","text":"t","meta":{"title":"Resume"}}"#).unwrap();
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("Resume"));
    }

    #[test]
    fn ask_event_wire_format_is_stable() {
        let chunk = serde_json::to_string(&AskEvent::Chunk("hi".to_string())).unwrap();
        assert_eq!(chunk, r#"{"type":"chunk","data":"hi"}"#);

        let sources = serde_json::to_string(&AskEvent::Sources(Vec::new())).unwrap();
        assert_eq!(sources, r#"{"type":"sources","data":[]}"#);
    }
}
