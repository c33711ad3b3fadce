//! Chat-completions HTTP client.
//!
//! Speaks the OpenAI-compatible chat-completions wire format over
//! `reqwest`, with exponential-backoff retry on transient failures and
//! SSE streaming that assembles tool-call fragments directly from the
//! deltas.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::provider::{LlmProvider, LlmResponse, LlmStream, StreamEvent};
use super::types::*;
use crate::error::{Error, ProviderError, Result};

/// Configuration for the chat-completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API key sent as a bearer token
    pub api_key: SecretString,
    /// Base URL, e.g. `https://openrouter.ai/api/v1`
    pub base_url: String,
    /// Model used when the request does not override it
    pub default_model: String,
    /// Whole-request timeout
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_retries() -> u32 {
    3
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    config: ProviderConfig,
}

impl ChatCompletionsClient {
    /// Create a new client.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(ChatCompletionsClient { client, config })
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            stop: options.stop.clone(),
            stream: stream.then_some(true),
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
            tool_choice: (!tools.is_empty()).then(|| ToolChoice::Mode("auto".to_string())),
            transforms: None,
            route: None,
        }
    }

    /// POST a request, retrying transient failures with backoff + jitter.
    async fn send_with_retry(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let attempts = Arc::new(AtomicU32::new(0));
        let max_retries = self.config.max_retries;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .build();

        backoff::future::retry(policy, || {
            let attempts = Arc::clone(&attempts);
            let url = url.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("LLM request attempt {} to {}", attempt, url);

                let response = self
                    .client
                    .post(&url)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| classify_transport_error(e))
                    .map_err(Error::Provider);

                match response {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            return Ok(resp);
                        }
                        let body = resp.text().await.unwrap_or_default();
                        let err = Error::Provider(classify_status(status, body));
                        if err.is_retryable() && attempt <= max_retries {
                            warn!("LLM request failed (attempt {}): {}", attempt, err);
                            Err(backoff::Error::transient(err))
                        } else {
                            Err(backoff::Error::permanent(err))
                        }
                    }
                    Err(err) => {
                        if err.is_retryable() && attempt <= max_retries {
                            warn!("LLM transport error (attempt {}): {}", attempt, err);
                            Err(backoff::Error::transient(err))
                        } else {
                            Err(backoff::Error::permanent(err))
                        }
                    }
                }
            }
        })
        .await
    }
}

/// Map an HTTP status to a provider error kind.
fn classify_status(status: StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimit(body),
        401 | 403 => ProviderError::AuthFailed(body),
        400..=499 => ProviderError::BadRequest(format!("{}: {}", status, body)),
        _ => ProviderError::ServerError(format!("{}: {}", status, body)),
    }
}

/// Map a reqwest transport failure to a provider error kind.
fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::NetworkError(err.to_string())
}

#[async_trait]
impl LlmProvider for ChatCompletionsClient {
    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<LlmResponse> {
        let request = self.build_request(messages, tools, options, false);
        let response = self.send_with_retry(&request).await?;

        let body = response.json::<ChatCompletionResponse>().await?;
        if let Some(ref usage) = body.usage {
            info!(
                "LLM response: model={}, tokens={}",
                body.model, usage.total_tokens
            );
        }

        Ok(LlmResponse::from_completion(body))
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<LlmStream> {
        let request = self.build_request(messages, tools, options, true);
        let response = self.send_with_retry(&request).await?;

        let (mut tx, rx) = mpsc::unbounded::<Result<StreamEvent>>();

        tokio::spawn(async move {
            let mut assembler = StreamAssembler::new();
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut done = false;

            'outer: while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Provider(classify_transport_error(e))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        // Blank keepalives and ": ping" comments are ignored
                        // and never reset timeouts.
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        done = true;
                        break 'outer;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => {
                            if let Some(content) = assembler.push(&chunk) {
                                if tx.send(Ok(StreamEvent::Content(content))).await.is_err() {
                                    return;
                                }
                            }
                            if assembler.finished() {
                                done = true;
                                break 'outer;
                            }
                        }
                        Err(e) => {
                            debug!("Skipping unparseable SSE chunk: {} ({})", data, e);
                        }
                    }
                }
            }

            if done {
                let _ = tx.send(Ok(StreamEvent::Done(assembler.finish()))).await;
            } else {
                let _ = tx
                    .send(Err(Error::Provider(ProviderError::NetworkError(
                        "stream closed before completion".to_string(),
                    ))))
                    .await;
            }
        });

        Ok(Box::pin(rx))
    }
}

/// Assembles streaming deltas into a complete response.
///
/// Tool-call fragments arrive indexed; the id, name, and argument text
/// each accumulate on the entry for their index, so a complete call is
/// available as soon as the stream ends without any re-invocation.
pub struct StreamAssembler {
    id: String,
    model: String,
    content: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    tool_calls: Vec<PartialToolCall>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    call_type: String,
    name: String,
    arguments: String,
}

impl StreamAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        StreamAssembler {
            id: String::new(),
            model: String::new(),
            content: String::new(),
            finish_reason: None,
            usage: None,
            tool_calls: Vec::new(),
        }
    }

    /// Merge one chunk. Returns the content fragment, if any.
    pub fn push(&mut self, chunk: &ChatCompletionChunk) -> Option<String> {
        if self.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if self.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let choice = chunk.choices.first()?;
        if let Some(ref reason) = choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        if let Some(ref deltas) = choice.delta.tool_calls {
            for delta in deltas {
                let index = delta.index as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(PartialToolCall::default());
                }
                let slot = &mut self.tool_calls[index];
                if let Some(ref id) = delta.id {
                    slot.id.push_str(id);
                }
                if let Some(ref call_type) = delta.call_type {
                    slot.call_type = call_type.clone();
                }
                if let Some(ref function) = delta.function {
                    if let Some(ref name) = function.name {
                        slot.name.push_str(name);
                    }
                    if let Some(ref args) = function.arguments {
                        slot.arguments.push_str(args);
                    }
                }
            }
        }

        let fragment = choice.delta.content.clone().filter(|c| !c.is_empty());
        if let Some(ref fragment) = fragment {
            self.content.push_str(fragment);
        }
        fragment
    }

    /// Whether a finish reason has been observed.
    pub fn finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Produce the assembled response.
    pub fn finish(self) -> LlmResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|tc| !tc.name.is_empty())
            .map(|tc| ToolCallRequest {
                id: tc.id,
                call_type: if tc.call_type.is_empty() {
                    "function".to_string()
                } else {
                    tc.call_type
                },
                function: FunctionCall {
                    name: tc.name,
                    arguments: tc.arguments,
                },
            })
            .collect();

        LlmResponse {
            id: self.id,
            model: self.model,
            content: self.content,
            finish_reason: self.finish_reason,
            tool_calls,
            usage: self.usage,
        }
    }
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: SecretString::from("test-key"),
            base_url,
            default_model: "test/model".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    fn chunk_from_json(json: serde_json::Value) -> ChatCompletionChunk {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn assembler_concatenates_content() {
        let mut assembler = StreamAssembler::new();
        for text in ["Hel", "lo", " world"] {
            assembler.push(&chunk_from_json(serde_json::json!({
                "id": "c1",
                "model": "m",
                "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}],
            })));
        }
        assembler.push(&chunk_from_json(serde_json::json!({
            "id": "c1",
            "model": "m",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        })));

        assert!(assembler.finished());
        let response = assembler.finish();
        assert_eq!(response.content, "Hello world");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn assembler_merges_tool_call_fragments() {
        let mut assembler = StreamAssembler::new();
        assembler.push(&chunk_from_json(serde_json::json!({
            "id": "c1",
            "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "read_file", "arguments": "{\"pa"}}
            ]}, "finish_reason": null}],
        })));
        assembler.push(&chunk_from_json(serde_json::json!({
            "id": "c1",
            "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "th\":\"/tmp/a\"}"}}
            ]}, "finish_reason": null}],
        })));
        assembler.push(&chunk_from_json(serde_json::json!({
            "id": "c1",
            "model": "m",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
        })));

        let response = assembler.finish();
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.function.name, "read_file");
        assert_eq!(call.function.arguments, "{\"path\":\"/tmp/a\"}");
    }

    #[tokio::test]
    async fn generate_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "resp_1",
                "created": 0,
                "model": "test/model",
                "choices": [{"index": 0,
                    "message": {"role": "assistant", "content": "Hi"},
                    "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
            })))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(test_config(server.uri())).unwrap();
        let response = client
            .generate(&[Message::user("Hello")], &[], &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(response.content, "Hi");
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[tokio::test]
    async fn generate_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "resp_2",
                "created": 0,
                "model": "test/model",
                "choices": [{"index": 0,
                    "message": {"role": "assistant", "content": "recovered"},
                    "finish_reason": "stop"}],
                "usage": null,
            })))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(test_config(server.uri())).unwrap();
        let response = client
            .generate(&[Message::user("Hello")], &[], &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn generate_does_not_retry_auth_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(test_config(server.uri())).unwrap();
        let err = client
            .generate(&[Message::user("Hello")], &[], &GenerationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Provider(ProviderError::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn generate_stream_yields_content_then_done() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keepalive\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: [DONE]\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(test_config(server.uri())).unwrap();
        let mut stream = client
            .generate_stream(&[Message::user("Hello")], &[], &GenerationOptions::default())
            .await
            .unwrap();

        let mut content = String::new();
        let mut final_response = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Content(fragment) => content.push_str(&fragment),
                StreamEvent::Done(response) => final_response = Some(response),
            }
        }

        let response = final_response.expect("stream should end with Done");
        assert_eq!(content, "Hello");
        assert_eq!(response.content, "Hello");
    }
}
