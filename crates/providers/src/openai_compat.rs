//! OpenAI-compatible provider implementation.
//!
//! Talks to `/chat/completions` with `stream: true`. Works against OpenAI
//! itself and any endpoint exposing the same wire format (set the base URL).
//!
//! Supports:
//! - Bearer authentication
//! - Streaming text deltas
//! - Function calling with arguments streamed per call index

use std::sync::Arc;

use async_trait::async_trait;
use diskdoc_core::error::ProviderError;
use diskdoc_core::message::Message;
use diskdoc_core::provider::{Provider, StreamErrorKind, StreamEvent, TextSink, ToolCallSink};
use diskdoc_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rate_limit::{RateLimitObserver, RateLimiter};
use crate::sse::{StreamDecoder, ToolCallAssembler};
use crate::transport::{self, Admission};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DONE_SENTINEL: &str = "[DONE]";

/// Quota headers fed back into the rate limiter.
pub const TOKENS_LIMIT_HEADER: &str = "x-ratelimit-limit-tokens";
pub const REQUESTS_LIMIT_HEADER: &str = "x-ratelimit-limit-requests";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
    admission: Admission,
}

impl OpenAiCompatProvider {
    /// Create a new provider with its own default rate limiter.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: transport::http_client(),
            admission: Admission {
                limiter: Some(Arc::new(RateLimiter::from_config(&Default::default()))),
                observer: None,
            },
        }
    }

    /// Create from the `[openai]` config section.
    pub fn from_config(config: &diskdoc_config::ProviderConfig) -> Self {
        let mut provider = Self::new(config.credential().unwrap_or_default(), &config.model)
            .with_max_tokens(config.max_tokens);
        if let Some(url) = &config.api_url {
            provider = provider.with_base_url(url);
        }
        provider
    }

    /// Point at another OpenAI-compatible endpoint (including the `/v1`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Share `limiter` with other providers instead of the private default.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.admission.limiter = Some(limiter);
        self
    }

    pub fn without_rate_limiter(mut self) -> Self {
        self.admission.limiter = None;
        self
    }

    pub fn with_rate_limit_observer(mut self, observer: RateLimitObserver) -> Self {
        self.admission.observer = Some(observer);
        self
    }

    /// Build the request body, dropping blank turns.
    fn encode_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> Result<ChatRequest<'a>, ProviderError> {
        let api_messages: Vec<ApiMessage<'a>> = messages
            .iter()
            .filter(|m| !m.is_blank())
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        if api_messages.is_empty() {
            return Err(ProviderError::Validation("no non-empty messages to send".into()));
        }

        Ok(ChatRequest {
            model: &self.model,
            messages: api_messages,
            stream: true,
            max_tokens: self.max_tokens,
            tools: tools
                .iter()
                .map(|t| ApiToolDefinition {
                    r#type: "function",
                    function: ApiToolFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.input_schema,
                    },
                })
                .collect(),
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_text: TextSink<'_>,
        on_tool_call: Option<ToolCallSink<'_>>,
    ) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::AuthenticationFailed("OpenAI API key not set".into()));
        }
        let body = self.encode_request(messages, tools)?;
        self.admission.admit(cancel, messages).await?;

        debug!(
            provider = "openai",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending streaming request"
        );

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = transport::send(cancel, request).await?;
        self.admission
            .record_quota(&response, TOKENS_LIMIT_HEADER, REQUESTS_LIMIT_HEADER);
        let response = transport::check_status("openai", response).await?;

        transport::drive(cancel, response, OpenAiDecoder::new(), on_text, on_tool_call).await
    }
}

/// Decoder for chat-completion chunks. Tool calls are keyed by the
/// `index` the vendor assigns and finalized together at the end.
#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    tools: ToolCallAssembler,
}

impl OpenAiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn tool_delta(&mut self, delta: StreamToolCallDelta, events: &mut Vec<StreamEvent>) {
        let index = delta.index;
        let id = delta.id.unwrap_or_default();
        let (name, arguments) = match delta.function {
            Some(f) => (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()),
            None => (String::new(), String::new()),
        };

        let starting = !self.tools.is_pending(index);
        self.tools.declare(index, &id, &name);
        if starting || !id.is_empty() || !name.is_empty() {
            events.push(StreamEvent::ToolCallStarted { index, id, name });
        }

        if !arguments.is_empty() {
            self.tools.append_arguments(index, &arguments);
            events.push(StreamEvent::ToolCallArgumentChunk {
                index,
                fragment: arguments,
            });
        }
    }
}

impl StreamDecoder for OpenAiDecoder {
    fn decode(&mut self, data: &str) -> Vec<StreamEvent> {
        if data.trim() == DONE_SENTINEL {
            return self.finish();
        }

        let mut events = Vec::new();
        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable OpenAI SSE");
                return events;
            }
        };

        if let Some(error) = chunk.error {
            let detail = error["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            warn!(detail = %detail, "OpenAI stream error record");
            events.push(StreamEvent::Error(StreamErrorKind::Vendor(detail)));
            return events;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::TextDelta(content));
        }
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            self.tool_delta(delta, &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = self
            .tools
            .drain()
            .into_iter()
            .map(StreamEvent::ToolCallCompleted)
            .collect();
        events.push(StreamEvent::Done);
        events
    }
}

// --- API types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiToolDefinition<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition<'a> {
    r#type: &'static str,
    function: ApiToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskdoc_core::tool::ToolCall;
    use serde_json::json;

    fn decode_all(lines: &[&str]) -> Vec<StreamEvent> {
        let mut decoder = OpenAiDecoder::new();
        let mut events = Vec::new();
        for line in lines {
            events.extend(decoder.decode(line));
            if matches!(events.last(), Some(StreamEvent::Done | StreamEvent::Error(_))) {
                return events;
            }
        }
        events.extend(decoder.finish());
        events
    }

    fn completed(events: &[StreamEvent]) -> Vec<ToolCall> {
        let mut calls: Vec<ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallCompleted(call) => Some(call.clone()),
                _ => None,
            })
            .collect();
        calls.sort_by(|a, b| a.id.cmp(&b.id));
        calls
    }

    fn text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn content(text: &str) -> String {
        json!({"choices": [{"index": 0, "delta": {"content": text}}]}).to_string()
    }

    fn tool(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> String {
        let mut call = json!({"index": index, "function": {}});
        if let Some(id) = id {
            call["id"] = json!(id);
        }
        if let Some(name) = name {
            call["function"]["name"] = json!(name);
        }
        if let Some(args) = args {
            call["function"]["arguments"] = json!(args);
        }
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}}]}).to_string()
    }

    #[test]
    fn request_shape() {
        let provider = OpenAiCompatProvider::new("sk-test", "gpt-5");
        let messages = vec![
            Message::system("rules"),
            Message::user("disk full"),
            Message::assistant(""),
        ];
        let tools = diskdoc_core::tool::default_catalog();
        let body = serde_json::to_value(provider.encode_request(&messages, &tools).unwrap()).unwrap();
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["stream"], true);
        assert_eq!(
            body["messages"],
            json!([{"role": "system", "content": "rules"}, {"role": "user", "content": "disk full"}])
        );
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], tools[0].name.as_str());
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let provider = OpenAiCompatProvider::new("sk-test", "gpt-5");
        let err = provider.encode_request(&[Message::user(" \n")], &[]).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn text_chunks_and_done() {
        let events = decode_all(&[&content("Hello"), &content(" World"), "[DONE]"]);
        assert_eq!(text(&events), "Hello World");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn arguments_accumulate_per_index() {
        let events = decode_all(&[
            &tool(0, Some("call_1"), Some("execute_command"), Some("")),
            &content("running"),
            &tool(0, None, None, Some(r#"{"command":"ls","#)),
            &tool(0, None, None, Some(r#""description":"list"}"#)),
            "[DONE]",
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "execute_command");
        assert_eq!(
            Value::Object(calls[0].input.clone()),
            json!({"command": "ls", "description": "list"})
        );
        assert_eq!(text(&events), "running");
    }

    #[test]
    fn parallel_calls_are_independent() {
        let events = decode_all(&[
            &tool(0, Some("call_a"), Some("read_file"), Some(r#"{"path":"#)),
            &tool(1, Some("call_b"), Some("read_file"), Some(r#"{"path":"/etc/mtab"}"#)),
            &tool(0, None, None, Some(r#""/etc/fstab"}"#)),
            "[DONE]",
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].input["path"], "/etc/fstab");
        assert_eq!(calls[1].input["path"], "/etc/mtab");
    }

    #[test]
    fn identity_is_sticky_across_deltas() {
        let events = decode_all(&[
            &tool(0, Some("call_1"), None, None),
            &tool(0, None, Some("ask_user"), Some(r#"{"question":"ok?"}"#)),
            &tool(0, Some(""), Some(""), None),
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "ask_user");
    }

    #[test]
    fn calls_without_id_are_dropped() {
        let events = decode_all(&[&tool(0, None, Some("read_file"), Some("{}")), "[DONE]"]);
        assert!(completed(&events).is_empty());
    }

    #[test]
    fn error_record_aborts() {
        let events = decode_all(&[
            &content("a"),
            r#"{"error":{"message":"Rate limit exceeded","type":"requests"}}"#,
            &content("b"),
        ]);
        assert_eq!(text(&events), "a");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error(StreamErrorKind::Vendor("Rate limit exceeded".into())))
        );
    }

    #[test]
    fn malformed_and_empty_chunks_are_skipped() {
        let events = decode_all(&[
            "garbage",
            r#"{"choices":[]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            &content("x"),
        ]);
        assert_eq!(text(&events), "x");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }
}
