use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{CompletionError, TransportFailure};
use crate::traits::CompletionBackend;

const STREAM_CHANNEL_CAPACITY: usize = 32;
const END_OF_STREAM: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    /// Responses API, the primary transport.
    Responses,
    /// Chat Completions, the fallback transport.
    Chat,
}

impl Transport {
    fn name(self) -> &'static str {
        match self {
            Transport::Responses => "responses",
            Transport::Chat => "chat_completions",
        }
    }
}

/// Two-stage completion engine over an OpenAI-compatible backend.
///
/// Tries the Responses API first and falls back to Chat Completions on a
/// transport fault. Both transports receive identical (system, prompt)
/// messages, so callers cannot tell which one serviced the call; only
/// one of them is ever billed per request. Failures carry typed
/// [`TransportFailure`] reasons so non-transport bugs are not silently
/// swallowed as "fall back".
pub struct OpenAiCompletion {
    responses_url: Url,
    chat_url: Url,
    api_key: String,
    model: String,
    timeout: Duration,
    chunk_delay: Duration,
    client: Client,
}

impl OpenAiCompletion {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        chunk_delay: Duration,
    ) -> Result<Self, CompletionError> {
        let base = api_base.trim_end_matches('/');
        Ok(Self {
            responses_url: Url::parse(&format!("{base}/responses"))?,
            chat_url: Url::parse(&format!("{base}/chat/completions"))?,
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            chunk_delay,
            client: Client::new(),
        })
    }

    fn request_body(
        &self,
        transport: Transport,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
        stream: bool,
    ) -> Value {
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user_prompt },
        ]);

        match transport {
            Transport::Responses => json!({
                "model": self.model,
                "input": messages,
                "max_output_tokens": max_tokens,
                "stream": stream,
            }),
            Transport::Chat => json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": max_tokens,
                "temperature": 0.2,
                "stream": stream,
            }),
        }
    }

    async fn send(
        &self,
        transport: Transport,
        body: &Value,
    ) -> Result<reqwest::Response, TransportFailure> {
        let url = match transport {
            Transport::Responses => self.responses_url.clone(),
            Transport::Chat => self.chat_url.clone(),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TransportFailure::Timeout(self.timeout)
                } else {
                    TransportFailure::Connect(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(TransportFailure::Status {
                status: status.as_u16(),
                details,
            });
        }

        Ok(response)
    }

    async fn complete_via(
        &self,
        transport: Transport,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, TransportFailure> {
        let body = self.request_body(transport, system, user_prompt, max_tokens, false);
        let response = self.send(transport, &body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|error| TransportFailure::MalformedEvent(error.to_string()))?;
        extract_full_text(transport, &parsed)
    }

    async fn open_stream(
        &self,
        transport: Transport,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<reqwest::Response, TransportFailure> {
        let body = self.request_body(transport, system, user_prompt, max_tokens, true);
        self.send(transport, &body).await
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletion {
    async fn complete(
        &self,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let primary = match self
            .complete_via(Transport::Responses, system, user_prompt, max_tokens)
            .await
        {
            Ok(text) => return Ok(text),
            Err(failure) => failure,
        };

        tracing::warn!(transport = Transport::Responses.name(), %primary, "primary transport failed, falling back");

        match self
            .complete_via(Transport::Chat, system, user_prompt, max_tokens)
            .await
        {
            Ok(text) => Ok(text),
            Err(fallback) => Err(CompletionError::Exhausted { primary, fallback }),
        }
    }

    async fn stream(
        &self,
        system: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<mpsc::Receiver<String>, CompletionError> {
        let (transport, response) = match self
            .open_stream(Transport::Responses, system, user_prompt, max_tokens)
            .await
        {
            Ok(response) => (Transport::Responses, response),
            Err(primary) => {
                tracing::warn!(transport = Transport::Responses.name(), %primary, "primary stream failed, falling back");
                match self
                    .open_stream(Transport::Chat, system, user_prompt, max_tokens)
                    .await
                {
                    Ok(response) => (Transport::Chat, response),
                    Err(fallback) => {
                        return Err(CompletionError::Exhausted { primary, fallback })
                    }
                }
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let delay = self.chunk_delay;

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            let mut bytes = response.bytes_stream();

            'pump: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        tracing::warn!(transport = transport.name(), %error, "stream dropped mid-flight");
                        break;
                    }
                };

                for payload in decoder.feed(&chunk) {
                    if payload == END_OF_STREAM {
                        break 'pump;
                    }
                    match delta_from_event(transport, &payload) {
                        Ok(Some(delta)) if !delta.is_empty() => {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            // Receiver dropped means the caller cancelled.
                            if tx.send(delta).await.is_err() {
                                break 'pump;
                            }
                        }
                        Ok(_) => {}
                        Err(failure) => {
                            tracing::warn!(transport = transport.name(), %failure, "unparseable stream event");
                            break 'pump;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Incremental server-sent-events framing: accumulates bytes and yields
/// the payload of each complete `data:` line. Buffers raw bytes so a
/// multi-byte codepoint split across network chunks stays intact; only
/// complete lines are decoded.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.trim_end_matches('\r');

            if let Some(payload) = line.strip_prefix("data:") {
                payloads.push(payload.trim_start().to_string());
            }
        }
        payloads
    }
}

fn delta_from_event(transport: Transport, payload: &str) -> Result<Option<String>, TransportFailure> {
    let event: Value = serde_json::from_str(payload)
        .map_err(|error| TransportFailure::MalformedEvent(error.to_string()))?;

    let delta = match transport {
        Transport::Responses => {
            // Only text deltas carry answer content; other event kinds
            // (created, completed, usage) are bookkeeping.
            if event.pointer("/type").and_then(Value::as_str)
                == Some("response.output_text.delta")
            {
                event.pointer("/delta").and_then(Value::as_str)
            } else {
                None
            }
        }
        Transport::Chat => event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str),
    };

    Ok(delta.map(str::to_string))
}

fn extract_full_text(transport: Transport, value: &Value) -> Result<String, TransportFailure> {
    let text = match transport {
        Transport::Responses => value
            .pointer("/output_text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                // Expanded shape: output[].content[].text for output_text parts.
                let parts = value.pointer("/output").and_then(Value::as_array)?;
                let mut collected = String::new();
                for part in parts {
                    let Some(contents) = part.pointer("/content").and_then(Value::as_array) else {
                        continue;
                    };
                    for content in contents {
                        if content.pointer("/type").and_then(Value::as_str) == Some("output_text")
                        {
                            if let Some(text) = content.pointer("/text").and_then(Value::as_str) {
                                collected.push_str(text);
                            }
                        }
                    }
                }
                (!collected.is_empty()).then_some(collected)
            }),
        Transport::Chat => value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    text.ok_or_else(|| {
        TransportFailure::MalformedEvent(format!(
            "{} response without output text",
            transport.name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_reassembles_events_split_across_feeds() {
        let mut decoder = SseDecoder::default();
        let first = decoder.feed(b"data: {\"a\":");
        assert!(first.is_empty());

        let second = decoder.feed(b"1}\n\ndata: [DONE]\n");
        assert_eq!(second, vec![r#"{"a":1}"#.to_string(), END_OF_STREAM.to_string()]);
    }

    #[test]
    fn decoder_keeps_multibyte_text_intact_across_split_feeds() {
        let mut decoder = SseDecoder::default();
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"שלום\"}}]}\n";
        let bytes = event.as_bytes();
        // Split between the two bytes of the final Hebrew letter.
        let split = event.find('ם').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let payloads = decoder.feed(&bytes[split..]);
        assert_eq!(payloads.len(), 1);

        let delta = delta_from_event(Transport::Chat, &payloads[0]).unwrap();
        assert_eq!(delta.as_deref(), Some("שלום"));
    }

    #[test]
    fn decoder_ignores_non_data_lines() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.feed(b"event: ping\r\ndata: {\"x\":2}\r\n\r\n");
        assert_eq!(payloads, vec![r#"{"x":2}"#.to_string()]);
    }

    #[test]
    fn responses_delta_events_yield_text() {
        let payload = r#"{"type":"response.output_text.delta","delta":"Dav"}"#;
        let delta = delta_from_event(Transport::Responses, payload).unwrap();
        assert_eq!(delta.as_deref(), Some("Dav"));
    }

    #[test]
    fn responses_bookkeeping_events_yield_nothing() {
        let payload = r#"{"type":"response.completed"}"#;
        let delta = delta_from_event(Transport::Responses, payload).unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn chat_delta_events_yield_text() {
        let payload = r#"{"choices":[{"delta":{"content":"id"}}]}"#;
        let delta = delta_from_event(Transport::Chat, payload).unwrap();
        assert_eq!(delta.as_deref(), Some("id"));
    }

    #[test]
    fn garbage_events_are_a_typed_failure() {
        let result = delta_from_event(Transport::Chat, "not json");
        assert!(matches!(result, Err(TransportFailure::MalformedEvent(_))));
    }

    #[test]
    fn full_text_from_responses_flat_shape() {
        let value = serde_json::json!({ "output_text": "David built it." });
        let text = extract_full_text(Transport::Responses, &value).unwrap();
        assert_eq!(text, "David built it.");
    }

    #[test]
    fn full_text_from_responses_expanded_shape() {
        let value = serde_json::json!({
            "output": [
                { "content": [ { "type": "output_text", "text": "David " } ] },
                { "content": [ { "type": "output_text", "text": "built it." } ] },
            ]
        });
        let text = extract_full_text(Transport::Responses, &value).unwrap();
        assert_eq!(text, "David built it.");
    }

    #[test]
    fn full_text_from_chat_shape() {
        let value = serde_json::json!({
            "choices": [ { "message": { "content": "David built it." } } ]
        });
        let text = extract_full_text(Transport::Chat, &value).unwrap();
        assert_eq!(text, "David built it.");
    }

    #[test]
    fn missing_text_is_a_typed_failure() {
        let value = serde_json::json!({ "choices": [] });
        let result = extract_full_text(Transport::Chat, &value);
        assert!(matches!(result, Err(TransportFailure::MalformedEvent(_))));
    }
}
