//! Client for OpenAI-compatible chat-completion APIs (Groq by default).

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Generated text, delivered in the pieces the upstream produces it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Upper bound on a whole completion call, body included.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_completion(&self, prompt: String) -> Result<TextStream>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: Option<String>, base_url: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn stream_completion(&self, prompt: String) -> Result<TextStream> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("COMPLETION_API_KEY is not configured"))?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 1.0,
            max_tokens: 300,
            stream: true,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Completion API returned {status}: {body}");
        }

        let mut bytes = Box::pin(resp.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("Completion stream interrupted"));
                        break;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Data(data) => match delta_text(&data) {
                            Ok(Some(text)) => {
                                yield Ok(text);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                break 'read;
                            }
                        },
                        SseEvent::Done => break 'read,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental decoder for `data:` lines of a server-sent-event stream.
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks survive intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

/// Content delta of one streamed chat-completion chunk, if it has any.
fn delta_text(data: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .with_context(|| format!("Malformed completion chunk: {data}"))?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty());
    if text.is_none() {
        debug!("Completion chunk without content");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn decoder_keeps_multibyte_characters() {
        let mut decoder = SseDecoder::default();
        let line = "data: héllo\r\n".as_bytes();
        let (head, tail) = line.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![SseEvent::Data("héllo".into())]);
    }

    #[test]
    fn decoder_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\nevent: ping\nid: 3\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn delta_text_extracts_content() {
        let data = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"What||"}}]}"#;
        assert_eq!(delta_text(data).unwrap().as_deref(), Some("What||"));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(delta_text(role_only).unwrap(), None);

        assert!(delta_text("not json").is_err());
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let client =
            OpenAiCompatClient::new(None, "http://127.0.0.1:9".into(), "m".into()).unwrap();
        assert!(client.stream_completion("hi".into()).await.is_err());
    }
}
