//! Chat completion provider abstraction.
//!
//! [`OpenAICompletion`] calls `POST {api_base}/chat/completions`, either
//! whole (`complete`) or as server-sent events (`complete_stream`), yielding
//! text deltas in arrival order.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::{GenerationConfig, ProviderConfig};
use crate::error::{ChatError, ChatResult};
use crate::http::{build_client, send_json, send_with_retry, RetryPolicy};
use crate::stream::LineBuffer;

/// Text deltas from a streamed completion.
pub type DeltaStream = BoxStream<'static, ChatResult<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run a completion and return the whole raw text.
    async fn complete(&self, messages: &[ChatMessage]) -> ChatResult<String>;

    /// Run a completion and yield text deltas as they arrive.
    ///
    /// The default implementation yields the whole completion as one delta.
    async fn complete_stream(&self, messages: &[ChatMessage]) -> ChatResult<DeltaStream> {
        let text = self.complete(messages).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

// ============ OpenAI Provider ============

pub struct OpenAICompletion {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAICompletion {
    pub fn new(
        provider: &ProviderConfig,
        generation: &GenerationConfig,
        api_key: &str,
    ) -> ChatResult<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(provider.timeout_secs))?,
            api_base: provider.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: provider.completion_model.clone(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            retry: RetryPolicy::new(provider.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<EmbeddedError>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    delta: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddedError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> ChatResult<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.request_body(messages, false);

        let response: CompletionResponse = send_json(self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        // Some providers report errors inside a 200 body.
        if let Some(err) = response.error {
            return Err(ChatError::Provider {
                status: 200,
                message: err.message,
            });
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ChatError::Provider {
                status: 200,
                message: "completion response had no content".to_string(),
            })
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> ChatResult<DeltaStream> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.request_body(messages, true);

        let response = send_with_retry(self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("Accept", "text/event-stream")
                .json(&body)
        })
        .await?;

        Ok(sse_deltas(response.bytes_stream()))
    }
}

/// One parsed server-sent-event line.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

fn parse_sse_line(line: &str) -> ChatResult<Option<SseEvent>> {
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, event names, blank keep-alive lines.
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    if data.is_empty() {
        return Ok(None);
    }

    let parsed: CompletionResponse = serde_json::from_str(data)
        .map_err(|e| ChatError::MalformedChunk(format!("provider stream: {}", e)))?;
    if let Some(err) = parsed.error {
        return Err(ChatError::Provider {
            status: 200,
            message: err.message,
        });
    }
    let delta = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty());
    Ok(delta.map(SseEvent::Delta))
}

/// Turn an SSE byte stream into a stream of text deltas.
fn sse_deltas<S, B, E>(bytes: S) -> DeltaStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    struct SseState<S> {
        bytes: S,
        lines: LineBuffer,
        pending: VecDeque<ChatResult<String>>,
        done: bool,
    }

    let init = SseState {
        bytes: Box::pin(bytes),
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(init, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            let lines = match st.bytes.next().await {
                Some(Ok(chunk)) => st.lines.push(chunk.as_ref()),
                Some(Err(e)) => {
                    st.pending.push_back(Err(e.into()));
                    st.done = true;
                    continue;
                }
                None => {
                    st.done = true;
                    st.lines.finish().into_iter().collect()
                }
            };

            for line in lines {
                match parse_sse_line(&line) {
                    Ok(Some(SseEvent::Delta(text))) => st.pending.push_back(Ok(text)),
                    Ok(Some(SseEvent::Done)) => {
                        st.done = true;
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        st.pending.push_back(Err(e));
                        st.done = true;
                        break;
                    }
                }
            }
        }
    })
    .boxed()
}

/// Scripted providers for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Yields the given deltas, optionally pausing before each one.
    pub struct ScriptedCompletion {
        pub deltas: Vec<String>,
        pub delay: Duration,
    }

    impl ScriptedCompletion {
        pub fn new(deltas: &[&str]) -> Self {
            Self {
                deltas: deltas.iter().map(|s| s.to_string()).collect(),
                delay: Duration::ZERO,
            }
        }

        pub fn slow(text: &str, delay: Duration) -> Self {
            Self {
                deltas: vec![text.to_string()],
                delay,
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.deltas.concat())
        }

        async fn complete_stream(&self, _messages: &[ChatMessage]) -> ChatResult<DeltaStream> {
            let delay = self.delay;
            let deltas = self.deltas.clone();
            Ok(stream::iter(deltas)
                .then(move |d| async move {
                    tokio::time::sleep(delay).await;
                    Ok(d)
                })
                .boxed())
        }
    }

    /// Always fails with the error built by the wrapped function.
    pub struct FailingCompletion(pub fn() -> ChatError);

    #[async_trait]
    impl CompletionProvider for FailingCompletion {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> ChatResult<String> {
            Err((self.0)())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, response::IntoResponse, routing::post, Json, Router};

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(SseEvent::Delta("Hel".to_string()))
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("").unwrap(), None);
        // Role-only first delta carries no content.
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role).unwrap(), None);
        assert!(parse_sse_line("data: {broken").is_err());
    }

    #[tokio::test]
    async fn test_sse_deltas_split_across_reads() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"[THINKING:x]\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                    data: [DONE]\n\n";
        let pieces: Vec<Result<Vec<u8>, ChatError>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let deltas: Vec<String> = sse_deltas(stream::iter(pieces))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["[THINKING:x]", "Hi"]);
    }

    async fn spawn_provider() -> String {
        async fn handle(Json(body): Json<serde_json::Value>) -> axum::response::Response {
            if body["stream"] == true {
                let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello \"}}]}\n\n\
                           data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n\
                           data: [DONE]\n\n";
                ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
            } else {
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "Hello world"}}]
                }))
                .into_response()
            }
        }

        let app = Router::new().route("/v1/chat/completions", post(handle));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn provider(api_base: String) -> OpenAICompletion {
        let cfg = ProviderConfig {
            api_base,
            ..ProviderConfig::default()
        };
        OpenAICompletion::new(&cfg, &GenerationConfig::default(), "sk-test")
            .unwrap()
            .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_complete_against_mock() {
        let p = provider(spawn_provider().await);
        let text = p.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn test_complete_stream_against_mock() {
        let p = provider(spawn_provider().await);
        let deltas: Vec<String> = p
            .complete_stream(&[ChatMessage::user("hi")])
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas.concat(), "Hello world");
    }

    #[test]
    fn test_message_serialization() {
        let v = serde_json::to_value(ChatMessage::system("rules")).unwrap();
        assert_eq!(v, serde_json::json!({"role": "system", "content": "rules"}));
    }
}
