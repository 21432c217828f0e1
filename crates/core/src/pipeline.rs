use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ServiceConfig;
use crate::error::AskError;
use crate::models::{Answer, AskEvent, Metadata, Question, RetrievedCandidate};
use crate::prompt::PromptBuilder;
use crate::retrieve::Retriever;
use crate::traits::CompletionBackend;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Shown on the streaming path when a backend fault occurs. Deliberately
/// distinct from the insufficient-information message: "retry" is an
/// operational fault, "no relevant information" is a normal outcome.
pub const RETRY_MESSAGE: &str = "The request failed. Please try again.";

/// Per-request orchestration: retrieve, build the grounded or fallback
/// prompt, complete, shape. Holds handles to components constructed once
/// at process start; requests share nothing else.
pub struct AnswerPipeline {
    retriever: Retriever,
    completion: Arc<dyn CompletionBackend>,
    builder: PromptBuilder,
    config: ServiceConfig,
}

impl AnswerPipeline {
    pub fn new(
        retriever: Retriever,
        completion: Arc<dyn CompletionBackend>,
        builder: PromptBuilder,
        config: ServiceConfig,
    ) -> Self {
        Self {
            retriever,
            completion,
            builder,
            config,
        }
    }

    pub async fn ask(&self, question: &Question) -> Result<Answer, AskError> {
        let candidates = self.retrieve(question).await?;
        let system = self.builder.system_instruction();
        let (prompt, sources) = self.prompt_and_sources(&question.text, &candidates);

        let raw = self
            .completion
            .complete(&system, &prompt, self.config.max_output_tokens)
            .await?;

        Ok(self.shape(raw, sources))
    }

    /// Emits zero or more `chunk` events followed by exactly one
    /// terminal `sources` event. A retrieval or completion fault
    /// degrades to an `error` event plus an empty `sources` terminal;
    /// the stream never hangs and never skips the terminal event.
    pub fn ask_stream(self: Arc<Self>, question: Question) -> mpsc::Receiver<AskEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            self.run_stream(question, tx).await;
        });
        rx
    }

    async fn run_stream(&self, question: Question, tx: mpsc::Sender<AskEvent>) {
        let candidates = match self.retrieve(&question).await {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::error!(%error, "retrieval failed");
                let _ = tx.send(AskEvent::Error(RETRY_MESSAGE.to_string())).await;
                let _ = tx.send(AskEvent::Sources(Vec::new())).await;
                return;
            }
        };

        let system = self.builder.system_instruction();
        let (prompt, sources) = self.prompt_and_sources(&question.text, &candidates);

        match self
            .completion
            .stream(&system, &prompt, self.config.max_output_tokens)
            .await
        {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.recv().await {
                    // A closed receiver means the caller cancelled.
                    if tx.send(AskEvent::Chunk(fragment)).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(AskEvent::Sources(sources)).await;
            }
            Err(error) => {
                tracing::error!(%error, "completion transports exhausted");
                let _ = tx.send(AskEvent::Error(RETRY_MESSAGE.to_string())).await;
                let _ = tx.send(AskEvent::Sources(Vec::new())).await;
            }
        }
    }

    async fn retrieve(&self, question: &Question) -> Result<Vec<RetrievedCandidate>, AskError> {
        let top_k = if question.top_k == 0 {
            self.config.default_top_k
        } else {
            question.top_k
        };
        self.retriever
            .retrieve(&question.text, top_k, self.config.similarity_floor)
            .await
    }

    fn prompt_and_sources(
        &self,
        question_text: &str,
        candidates: &[RetrievedCandidate],
    ) -> (String, Vec<Metadata>) {
        if candidates.is_empty() {
            (self.builder.fallback_prompt(question_text), Vec::new())
        } else {
            let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
            let sources = candidates.iter().map(|c| c.metadata.clone()).collect();
            (
                self.builder.grounded_prompt(question_text, &texts),
                sources,
            )
        }
    }

    fn shape(&self, raw: String, sources: Vec<Metadata>) -> Answer {
        let trimmed = raw.trim();
        if trimmed.chars().count() < self.config.min_answer_chars {
            Answer {
                answer: self.builder.insufficient_answer(),
                sources: Vec::new(),
            }
        } else {
            Answer {
                answer: trimmed.to_string(),
                sources,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::error::{CompletionError, TransportFailure};
    use crate::ingest::Ingestor;
    use crate::models::Document;
    use crate::stores::MemoryVectorStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn exhausted() -> CompletionError {
        CompletionError::Exhausted {
            primary: TransportFailure::Connect("connection refused".to_string()),
            fallback: TransportFailure::Connect("connection refused".to_string()),
        }
    }

    struct ScriptedCompletion {
        reply: String,
        fail: bool,
        seen_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail: false,
                seen_prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: String::new(),
                fail: true,
                seen_prompts: Mutex::new(Vec::new()),
            }
        }

        fn last_prompt(&self) -> String {
            self.seen_prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedCompletion {
        async fn complete(
            &self,
            _system: &str,
            user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<String, CompletionError> {
            self.seen_prompts.lock().unwrap().push(user_prompt.to_string());
            if self.fail {
                return Err(exhausted());
            }
            Ok(self.reply.clone())
        }

        async fn stream(
            &self,
            _system: &str,
            user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<mpsc::Receiver<String>, CompletionError> {
            self.seen_prompts.lock().unwrap().push(user_prompt.to_string());
            if self.fail {
                return Err(exhausted());
            }

            let (tx, rx) = mpsc::channel(8);
            let reply = self.reply.clone();
            tokio::spawn(async move {
                let mid = reply.len() / 2;
                let split = reply
                    .char_indices()
                    .map(|(index, _)| index)
                    .find(|index| *index >= mid)
                    .unwrap_or(0);
                let (head, tail) = reply.split_at(split);
                for fragment in [head, tail] {
                    if !fragment.is_empty() && tx.send(fragment.to_string()).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    async fn seeded_store() -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        let ingestor = Ingestor::new(Arc::new(HashingEmbedder::default()), store.clone());
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "Resume".to_string());
        ingestor
            .ingest(vec![Document {
                id: "d1".to_string(),
                text: "David built a fraud-detection pipeline in 2022.".to_string(),
                metadata,
            }])
            .await
            .unwrap();
        store
    }

    fn pipeline(
        store: Arc<MemoryVectorStore>,
        completion: Arc<ScriptedCompletion>,
        floor: f32,
    ) -> AnswerPipeline {
        let config = ServiceConfig {
            similarity_floor: floor,
            ..ServiceConfig::default()
        };
        AnswerPipeline::new(
            Retriever::new(Arc::new(HashingEmbedder::default()), store),
            completion,
            PromptBuilder::new("David"),
            config,
        )
    }

    #[tokio::test]
    async fn grounded_question_returns_answer_with_sources() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::replying(
            "David built a fraud-detection pipeline in 2022.",
        ));
        let pipeline = pipeline(store, completion.clone(), 0.1);

        let answer = pipeline
            .ask(&Question::new("What did David build in 2022?"))
            .await
            .unwrap();

        assert!(answer.answer.contains("fraud-detection pipeline"));
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(
            answer.sources[0].get("title").map(String::as_str),
            Some("Resume")
        );
        assert!(completion
            .last_prompt()
            .contains("David built a fraud-detection pipeline in 2022."));
        assert!(completion.last_prompt().contains("SOURCE 1 START"));
    }

    #[tokio::test]
    async fn empty_store_takes_the_fallback_path() {
        let store = Arc::new(MemoryVectorStore::new());
        let completion = Arc::new(ScriptedCompletion::replying(
            "I can only answer about David, and I have no material on that.",
        ));
        let pipeline = pipeline(store, completion.clone(), 0.25);

        let answer = pipeline
            .ask(&Question::new("What is the capital of France?"))
            .await
            .unwrap();

        assert!(answer.sources.is_empty());
        assert!(completion.last_prompt().contains("no relevant information"));
        assert!(!completion.last_prompt().contains("SOURCE 1 START"));
    }

    #[tokio::test]
    async fn floor_of_one_forces_fallback_even_with_matches() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::replying("Nothing relevant."));
        let pipeline = pipeline(store, completion.clone(), 1.01);

        let answer = pipeline
            .ask(&Question::new("What did David build in 2022?"))
            .await
            .unwrap();

        assert!(answer.sources.is_empty());
        assert!(completion.last_prompt().contains("no relevant information"));
    }

    #[tokio::test]
    async fn short_answers_are_replaced_with_insufficient_message() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::replying("  "));
        let pipeline = pipeline(store, completion, 0.1);

        let answer = pipeline
            .ask(&Question::new("What did David build in 2022?"))
            .await
            .unwrap();

        assert!(answer.answer.contains("don't have enough information"));
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_exactly_one_sources_event() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::replying(
            "David built a fraud-detection pipeline.",
        ));
        let pipeline = Arc::new(pipeline(store, completion, 0.1));

        let mut rx = pipeline.ask_stream(Question::new("What did David build?"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let mut text = String::new();
        let mut sources_events = 0;
        for event in &events {
            match event {
                AskEvent::Chunk(fragment) => {
                    assert_eq!(sources_events, 0, "chunks must precede sources");
                    text.push_str(fragment);
                }
                AskEvent::Sources(sources) => {
                    sources_events += 1;
                    assert_eq!(sources.len(), 1);
                }
                AskEvent::Error(message) => panic!("unexpected error event: {message}"),
            }
        }
        assert_eq!(sources_events, 1);
        assert!(matches!(events.last(), Some(AskEvent::Sources(_))));
        assert_eq!(text, "David built a fraud-detection pipeline.");
    }

    #[tokio::test]
    async fn stream_and_complete_are_interchangeable() {
        let store = seeded_store().await;
        let reply = "David built a fraud-detection pipeline in 2022.";
        let completion = Arc::new(ScriptedCompletion::replying(reply));
        let pipeline = Arc::new(pipeline(store, completion, 0.1));

        let answer = pipeline
            .ask(&Question::new("What did David build?"))
            .await
            .unwrap();

        let mut rx = pipeline.ask_stream(Question::new("What did David build?"));
        let mut streamed = String::new();
        while let Some(event) = rx.recv().await {
            if let AskEvent::Chunk(fragment) = event {
                streamed.push_str(&fragment);
            }
        }

        assert_eq!(answer.answer, streamed);
    }

    #[tokio::test]
    async fn failed_stream_still_terminates_with_sources() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::failing());
        let pipeline = Arc::new(pipeline(store, completion, 0.1));

        let mut rx = pipeline.ask_stream(Question::new("What did David build?"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(events
            .iter()
            .any(|event| matches!(event, AskEvent::Error(message) if message == RETRY_MESSAGE)));
        assert!(matches!(
            events.last(),
            Some(AskEvent::Sources(sources)) if sources.is_empty()
        ));
        assert!(!events.iter().any(|event| matches!(event, AskEvent::Chunk(_))));
    }

    #[tokio::test]
    async fn non_streaming_completion_failure_surfaces_as_error() {
        let store = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::failing());
        let pipeline = pipeline(store, completion, 0.1);

        let result = pipeline.ask(&Question::new("What did David build?")).await;
        assert!(matches!(result, Err(AskError::Completion(_))));
    }
}
