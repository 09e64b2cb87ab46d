//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` content blocks
//! - Streaming via SSE with `content_block_*` events

use std::sync::Arc;

use async_trait::async_trait;
use diskdoc_core::error::ProviderError;
use diskdoc_core::message::{Message, Role};
use diskdoc_core::provider::{Provider, StreamErrorKind, StreamEvent, TextSink, ToolCallSink};
use diskdoc_core::tool::ToolDefinition;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rate_limit::{RateLimitObserver, RateLimiter};
use crate::sse::{StreamDecoder, ToolCallAssembler};
use crate::transport::{self, Admission};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Quota headers fed back into the rate limiter.
pub const TOKENS_LIMIT_HEADER: &str = "anthropic-ratelimit-limit-tokens";
pub const REQUESTS_LIMIT_HEADER: &str = "anthropic-ratelimit-limit-requests";

/// Anthropic carries at most one tool_use block open at a time.
const BLOCK_INDEX: u32 = 0;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
    admission: Admission,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with its own default rate limiter.
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

    /// Create from the `[anthropic]` config section.
    pub fn from_config(config: &diskdoc_config::ProviderConfig) -> Self {
        let mut provider = Self::new(config.credential().unwrap_or_default(), &config.model)
            .with_max_tokens(config.max_tokens);
        if let Some(url) = &config.api_url {
            provider = provider.with_base_url(url);
        }
        provider
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
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

    /// Build the request body. System messages are hoisted into `system`;
    /// blank turns are dropped.
    fn encode_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> Result<MessagesRequest<'a>, ProviderError> {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut api_messages = Vec::new();

        for msg in messages {
            if msg.is_blank() {
                continue;
            }
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                role => api_messages.push(ApiMessage {
                    role: role.as_str(),
                    content: vec![ContentBlock::Text { text: &msg.content }],
                }),
            }
        }

        if api_messages.is_empty() {
            return Err(ProviderError::Validation("no non-empty messages to send".into()));
        }

        Ok(MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: api_messages,
            stream: true,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            tools: tools
                .iter()
                .map(|t| ApiTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            return Err(ProviderError::AuthenticationFailed(
                "Anthropic API key not set".into(),
            ));
        }
        let body = self.encode_request(messages, tools)?;
        self.admission.admit(cancel, messages).await?;

        debug!(
            provider = "anthropic",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending streaming request"
        );

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = transport::send(cancel, request).await?;
        self.admission
            .record_quota(&response, TOKENS_LIMIT_HEADER, REQUESTS_LIMIT_HEADER);
        let response = transport::check_status("anthropic", response).await?;

        transport::drive(cancel, response, AnthropicDecoder::new(), on_text, on_tool_call).await
    }
}

/// Decoder for the Messages API event stream.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    tools: ToolCallAssembler,
}

impl AnthropicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn complete_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(call) = self.tools.complete(BLOCK_INDEX) {
            events.push(StreamEvent::ToolCallCompleted(call));
        }
    }

    fn block_start(&mut self, block: &Value, events: &mut Vec<StreamEvent>) {
        if block["type"].as_str() != Some("tool_use") {
            return;
        }
        self.complete_block(events);

        let id = block["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .or_else(|| block["tool_use_id"].as_str())
            .unwrap_or_default();
        let name = block["name"].as_str().unwrap_or_default();
        if id.is_empty() || name.is_empty() {
            warn!(id, name, "tool_use block started without id or name");
        }

        self.tools.declare(BLOCK_INDEX, id, name);
        if let Some(input) = block["input"].as_object() {
            self.tools.merge_input(BLOCK_INDEX, input.clone());
        }
        events.push(StreamEvent::ToolCallStarted {
            index: BLOCK_INDEX,
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    fn block_delta(&mut self, delta: &Value, events: &mut Vec<StreamEvent>) {
        match delta["type"].as_str().unwrap_or_default() {
            "text_delta" => {
                if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                    events.push(StreamEvent::TextDelta(text.to_string()));
                }
            }
            "input_json_delta" => {
                let Some(partial) = delta["partial_json"].as_str().filter(|p| !p.is_empty()) else {
                    return;
                };
                if self.tools.append_arguments(BLOCK_INDEX, partial) {
                    events.push(StreamEvent::ToolCallArgumentChunk {
                        index: BLOCK_INDEX,
                        fragment: partial.to_string(),
                    });
                } else {
                    warn!("input_json_delta received with no tool_use block open");
                }
            }
            // Older streams carried the whole tool call inside the delta.
            "tool_use" => self.legacy_tool_delta(delta, events),
            other => trace!(delta_type = other, "Ignoring content_block_delta"),
        }
    }

    fn legacy_tool_delta(&mut self, delta: &Value, events: &mut Vec<StreamEvent>) {
        let starting = !self.tools.is_pending(BLOCK_INDEX);
        let id = delta["tool_use_id"].as_str().unwrap_or_default();
        let name = delta["name"].as_str().unwrap_or_default();
        self.tools.fill_missing(BLOCK_INDEX, id, name);
        if starting {
            events.push(StreamEvent::ToolCallStarted {
                index: BLOCK_INDEX,
                id: id.to_string(),
                name: name.to_string(),
            });
        }

        let Some(input) = delta["input"].as_object() else {
            return;
        };
        let mut values = Map::new();
        for (key, value) in input {
            match value {
                Value::String(fragment) => {
                    self.tools.append_arguments(BLOCK_INDEX, fragment);
                    events.push(StreamEvent::ToolCallArgumentChunk {
                        index: BLOCK_INDEX,
                        fragment: fragment.clone(),
                    });
                }
                other => {
                    values.insert(key.clone(), other.clone());
                }
            }
        }
        self.tools.merge_input(BLOCK_INDEX, values);
    }
}

impl StreamDecoder for AnthropicDecoder {
    fn decode(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if data == "[DONE]" {
            return self.finish();
        }

        let event: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return events;
            }
        };

        match event["type"].as_str().unwrap_or_default() {
            "content_block_start" => self.block_start(&event["content_block"], &mut events),
            "content_block_delta" => self.block_delta(&event["delta"], &mut events),
            "content_block_stop" => self.complete_block(&mut events),
            "message_stop" => {
                self.complete_block(&mut events);
                events.push(StreamEvent::Done);
            }
            "error" => {
                let detail = event["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                warn!(detail = %detail, "Anthropic stream error event");
                events.push(StreamEvent::Error(StreamErrorKind::Vendor(detail)));
            }
            other => trace!(event_type = other, "Ignoring Anthropic event"),
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

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskdoc_core::tool::default_catalog;
    use serde_json::json;

    fn decode_all(lines: &[&str]) -> Vec<StreamEvent> {
        let mut decoder = AnthropicDecoder::new();
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

    fn completed(events: &[StreamEvent]) -> Vec<&diskdoc_core::tool::ToolCall> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallCompleted(call) => Some(call),
                _ => None,
            })
            .collect()
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

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test", "claude")
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
        assert_eq!(provider.model(), "claude");
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn system_messages_are_hoisted_and_joined() {
        let provider = AnthropicProvider::new("k", "claude");
        let messages = vec![
            Message::system("You are helpful"),
            Message::system("Be concise"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];
        let body = serde_json::to_value(provider.encode_request(&messages, &[]).unwrap()).unwrap();
        assert_eq!(body["system"], "You are helpful\n\nBe concise");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0], json!({"type": "text", "text": "Hello"}));
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn blank_turns_are_dropped() {
        let provider = AnthropicProvider::new("k", "claude");
        let messages = vec![Message::user("df -h"), Message::assistant("  "), Message::user("ok")];
        let body = serde_json::to_value(provider.encode_request(&messages, &[]).unwrap()).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn all_blank_is_a_validation_error() {
        let provider = AnthropicProvider::new("k", "claude");
        let messages = vec![Message::system("rules"), Message::user("")];
        let err = provider.encode_request(&messages, &[]).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn tools_use_input_schema() {
        let provider = AnthropicProvider::new("k", "claude");
        let tools = default_catalog();
        let messages = vec![Message::user("disk full")];
        let body = serde_json::to_value(provider.encode_request(&messages, &tools).unwrap()).unwrap();
        let first = &body["tools"][0];
        assert_eq!(first["name"], tools[0].name.as_str());
        assert_eq!(first["input_schema"]["type"], "object");
    }

    #[test]
    fn text_deltas_stream_in_order() {
        let events = decode_all(&[
            r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" World"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        assert_eq!(text(&events), "Hello World");
        assert!(completed(&events).is_empty());
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn tool_use_block_assembles_input() {
        let events = decode_all(&[
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Checking."}}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"execute_command","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"command\":\"ls\","}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"description\":\"list\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(
            Value::Object(calls[0].input.clone()),
            json!({"command": "ls", "description": "list"})
        );
        assert_eq!(text(&events), "Checking.");
    }

    #[test]
    fn id_may_arrive_as_tool_use_id() {
        let events = decode_all(&[
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","tool_use_id":"toolu_legacy","name":"read_file"}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        assert_eq!(completed(&events)[0].id, "toolu_legacy");
    }

    #[test]
    fn new_tool_block_finalizes_the_previous_one() {
        let events = decode_all(&[
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"a","name":"read_file"}}"#,
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"b","name":"read_file"}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let ids: Vec<_> = completed(&events).into_iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn tool_without_id_is_dropped() {
        let events = decode_all(&[
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","name":"read_file"}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
            r#"{"type":"content_block_stop"}"#,
        ]);
        assert!(completed(&events).is_empty());
    }

    #[test]
    fn json_delta_without_open_block_is_ignored() {
        let events = decode_all(&[
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"a\":1}"}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn legacy_tool_use_delta() {
        let events = decode_all(&[
            r#"{"type":"content_block_delta","delta":{"type":"tool_use","tool_use_id":"toolu_9","name":"monitor_log","input":{"raw":"{\"path\":\"/var/log/syslog\"}","lines":20}}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"tool_use","tool_use_id":"ignored","name":"ignored"}}"#,
            r#"{"type":"content_block_stop"}"#,
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].name, "monitor_log");
        assert_eq!(calls[0].input["path"], "/var/log/syslog");
        assert_eq!(calls[0].input["lines"], 20);
    }

    #[test]
    fn pending_tool_is_finalized_at_end_of_body() {
        let events = decode_all(&[
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"t","name":"ask_user"}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"question\":\"which disk?\"}"}}"#,
        ]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input["question"], "which disk?");
    }

    #[test]
    fn error_event_aborts() {
        let events = decode_all(&[
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"partial"}}"#,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"never"}}"#,
        ]);
        assert_eq!(text(&events), "partial");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error(StreamErrorKind::Vendor("Overloaded".into())))
        );
    }

    #[test]
    fn malformed_records_are_skipped() {
        let events = decode_all(&[
            "{not json",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"ok"}}"#,
            "[DONE]",
        ]);
        assert_eq!(text(&events), "ok");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }
}
