//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation plus a tool catalog to an LLM
//! and stream the reply back through caller-supplied callbacks.
//!
//! Implementations: Anthropic Messages API, OpenAI chat completions.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};

/// Receives text deltas in stream order.
pub type TextSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Receives completed tool calls.
pub type ToolCallSink<'a> = &'a mut (dyn FnMut(ToolCall) + Send);

/// One decoded event from a vendor stream.
///
/// Vendor decoders translate their own event vocabulary into this union so
/// nothing vendor-specific reaches the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial text, emitted as soon as it is decoded.
    TextDelta(String),

    /// A tool call was declared (id and name may still be empty).
    ToolCallStarted { index: u32, id: String, name: String },

    /// A fragment of a tool call's JSON arguments.
    ToolCallArgumentChunk { index: u32, fragment: String },

    /// A tool call with non-empty id and name was finalized.
    ToolCallCompleted(ToolCall),

    /// The stream ended normally.
    Done,

    /// The stream failed; no further events follow.
    Error(StreamErrorKind),
}

/// Why a stream was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// The vendor sent an explicit error event.
    Vendor(String),

    /// A single SSE record exceeded the decoder's hard cap.
    RecordTooLarge { limit: usize },
}

impl From<StreamErrorKind> for ProviderError {
    fn from(kind: StreamErrorKind) -> Self {
        match kind {
            StreamErrorKind::Vendor(detail) => {
                ProviderError::StreamDecode(format!("error event received from stream: {detail}"))
            }
            StreamErrorKind::RecordTooLarge { limit } => {
                ProviderError::StreamDecode(format!("stream record exceeds {limit} bytes"))
            }
        }
    }
}

/// The core Provider trait.
///
/// Every LLM vendor implements this trait. The agent loop calls
/// `stream_chat()` without knowing which vendor is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// The model requests are sent to.
    fn model(&self) -> &str;

    /// Stream a reply for `messages`, offering `tools` to the model.
    ///
    /// Text deltas go to `on_text` in the order received; completed tool
    /// calls go to `on_tool_call` when one is supplied. Cancelling `cancel`
    /// aborts both the rate-limit wait and the body read with
    /// `ProviderError::Cancelled`.
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_text: TextSink<'_>,
        on_tool_call: Option<ToolCallSink<'_>>,
    ) -> std::result::Result<(), ProviderError>;

    /// Send a request without tools and return the concatenated reply.
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
    ) -> std::result::Result<String, ProviderError> {
        let mut response = String::new();
        self.stream_chat(cancel, messages, &[], &mut |chunk: &str| response.push_str(chunk), None)
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays fixed chunks; used to check the default `chat`.
    struct Replay(Vec<&'static str>);

    #[async_trait]
    impl Provider for Replay {
        fn name(&self) -> &str { "replay" }
        fn model(&self) -> &str { "replay-model" }

        async fn stream_chat(
            &self,
            cancel: &CancellationToken,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            on_text: TextSink<'_>,
            _on_tool_call: Option<ToolCallSink<'_>>,
        ) -> std::result::Result<(), ProviderError> {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            for chunk in &self.0 {
                on_text(chunk);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn chat_concatenates_chunks() {
        let provider = Replay(vec!["Hello", " World"]);
        let text = provider
            .chat(&CancellationToken::new(), &[Message::user("Hello")])
            .await
            .unwrap();
        assert_eq!(text, "Hello World");
    }

    #[tokio::test]
    async fn chat_propagates_cancellation() {
        let provider = Replay(vec!["never"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider.chat(&cancel, &[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[test]
    fn stream_error_kinds_map_to_decode_errors() {
        let err: ProviderError = StreamErrorKind::RecordTooLarge { limit: 8 }.into();
        assert!(matches!(err, ProviderError::StreamDecode(ref m) if m.contains('8')));
        let err: ProviderError = StreamErrorKind::Vendor("overloaded".into()).into();
        assert!(err.to_string().contains("overloaded"));
    }
}
