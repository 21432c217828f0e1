use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CompletionError;
use crate::prompt::{translation_prompt, TRANSLATE_SYSTEM_INSTRUCTION};
use crate::traits::CompletionBackend;

const HEBREW_BLOCK: &str = "[\u{0590}-\u{05FF}]";
const TRANSLATION_MAX_TOKENS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    He,
    En,
}

impl TargetLanguage {
    pub fn code(self) -> &'static str {
        match self {
            TargetLanguage::He => "he",
            TargetLanguage::En => "en",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            TargetLanguage::He => "Hebrew",
            TargetLanguage::En => "English",
        }
    }
}

/// Translates between Hebrew and English through the completion backend.
/// Used by the ingest annotation branch and the translate routes.
pub struct Translator {
    completion: Arc<dyn CompletionBackend>,
    hebrew: Regex,
}

impl Translator {
    pub fn new(completion: Arc<dyn CompletionBackend>) -> Self {
        Self {
            completion,
            // Fixed character class; always compiles.
            hebrew: Regex::new(HEBREW_BLOCK).unwrap_or_else(|_| unreachable!()),
        }
    }

    /// Whether the text is already written in the target language's
    /// script. Decides if ingest needs the annotation branch.
    pub fn is_target_script(&self, text: &str, target: TargetLanguage) -> bool {
        match target {
            TargetLanguage::He => self.hebrew.is_match(text),
            TargetLanguage::En => !self.hebrew.is_match(text),
        }
    }

    /// Empty or whitespace-only text passes through unchanged.
    pub async fn translate(
        &self,
        text: &str,
        target: TargetLanguage,
    ) -> Result<String, CompletionError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let prompt = translation_prompt(text, target.display_name());
        let translated = self
            .completion
            .complete(TRANSLATE_SYSTEM_INSTRUCTION, &prompt, TRANSLATION_MAX_TOKENS)
            .await?;
        Ok(translated.trim().to_string())
    }

    /// Streaming variant; same prompt and system instruction as
    /// [`Translator::translate`], fragments arrive as the backend emits
    /// them.
    pub async fn stream(
        &self,
        text: &str,
        target: TargetLanguage,
    ) -> Result<tokio::sync::mpsc::Receiver<String>, CompletionError> {
        let prompt = translation_prompt(text, target.display_name());
        self.completion
            .stream(TRANSLATE_SYSTEM_INSTRUCTION, &prompt, TRANSLATION_MAX_TOKENS)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct EchoCompletion;

    #[async_trait]
    impl CompletionBackend for EchoCompletion {
        async fn complete(
            &self,
            _system: &str,
            user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<String, CompletionError> {
            Ok(format!("translated: {user_prompt}"))
        }

        async fn stream(
            &self,
            _system: &str,
            _user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<mpsc::Receiver<String>, CompletionError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn whitespace_only_text_passes_through() {
        let translator = Translator::new(Arc::new(EchoCompletion));
        let result = translator.translate("   ", TargetLanguage::He).await.unwrap();
        assert_eq!(result, "   ");
    }

    #[tokio::test]
    async fn translation_goes_through_the_backend() {
        let translator = Translator::new(Arc::new(EchoCompletion));
        let result = translator
            .translate("shalom", TargetLanguage::En)
            .await
            .unwrap();
        assert!(result.starts_with("translated:"));
        assert!(result.contains("shalom"));
    }

    #[test]
    fn hebrew_script_detection() {
        let translator = Translator::new(Arc::new(EchoCompletion));
        assert!(translator.is_target_script("שלום עולם", TargetLanguage::He));
        assert!(!translator.is_target_script("hello world", TargetLanguage::He));
        assert!(translator.is_target_script("hello world", TargetLanguage::En));
        assert!(!translator.is_target_script("שלום", TargetLanguage::En));
    }
}
