//! Conversation history for one agent task.
//!
//! `ContextManager` owns the ordered message list sent to the provider on
//! every round. Once the history grows past a threshold, the older prefix
//! is replaced by a model-written summary so requests stay bounded.

pub mod transcript;

use std::sync::Arc;

use diskdoc_core::agent::AgentConfig;
use diskdoc_core::error::{Error, ProviderError};
use diskdoc_core::message::{Message, Role};
use diskdoc_core::provider::{Provider, TextSink, ToolCallSink};
use diskdoc_core::tool::{ToolCall, ToolDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use transcript::{FunctionCall, format_tool_result, function_call_marker, parse_function_calls};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes conversations \
while preserving important technical details.";

const SUMMARY_INSTRUCTION: &str = "Summarize the following conversation concisely. Always keep \
important details such as error messages, commands, and file paths:\n\n";

const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

/// Text and tool calls of one streamed assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Reply {
    /// Neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }
}

/// Ordered conversation history with summarization.
pub struct ContextManager {
    provider: Arc<dyn Provider>,
    messages: Vec<Message>,
    summarize_threshold: usize,
    keep_recent: usize,
    min_messages_to_summarize: usize,
}

impl ContextManager {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_config(provider, &AgentConfig::default())
    }

    pub fn with_config(provider: Arc<dyn Provider>, config: &AgentConfig) -> Self {
        Self {
            provider,
            messages: Vec::new(),
            summarize_threshold: config.summarize_threshold,
            keep_recent: config.keep_recent,
            min_messages_to_summarize: config.min_messages_to_summarize,
        }
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Replace every system message with a single one at position 0.
    ///
    /// A conversation summary is history, not a prompt, so it stays where
    /// it is.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages.retain(|m| m.role != Role::System || is_summary(m));
        self.messages.insert(0, Message::system(prompt));
    }

    /// Text of the leading system prompt, if there is one.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System && !is_summary(m))
            .map(|m| m.content.as_str())
    }

    /// Text of the current conversation summary, if history was compacted.
    pub fn summary(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| is_summary(m))
            .and_then(|m| m.content.strip_prefix(SUMMARY_PREFIX))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Every tool call recorded in assistant turns, oldest first.
    pub fn recorded_tool_calls(&self) -> Vec<FunctionCall> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| parse_function_calls(&m.content).0)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Append `user_input`, stream a reply over the full history, and record
    /// the reply as an assistant turn.
    ///
    /// Each tool call is also written into that assistant turn as a
    /// `<function_call>` marker. On error nothing is appended after the user
    /// turn.
    pub async fn stream_chat_with_tools(
        &mut self,
        cancel: &CancellationToken,
        user_input: &str,
        tools: &[ToolDefinition],
        on_chunk: TextSink<'_>,
        mut on_tool_call: Option<ToolCallSink<'_>>,
    ) -> Result<Reply, Error> {
        self.add_message(Role::User, user_input);

        if self.messages.len() > self.summarize_threshold {
            match self.summarize(cancel).await {
                Ok(_) => {}
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled.into()),
                Err(e) => warn!(error = %e, "Failed to summarize context, keeping full history"),
            }
        }

        let mut reply = Reply::default();
        self.provider
            .stream_chat(
                cancel,
                &self.messages,
                tools,
                &mut |chunk: &str| {
                    reply.text.push_str(chunk);
                    on_chunk(chunk);
                },
                Some(&mut |call: ToolCall| {
                    if let Some(sink) = on_tool_call.as_deref_mut() {
                        sink(call.clone());
                    }
                    reply.tool_calls.push(call);
                }),
            )
            .await?;

        let mut content = reply.text.clone();
        for call in &reply.tool_calls {
            content.push_str(&function_call_marker(&call.name, &call.input));
        }
        self.add_message(Role::Assistant, content);

        debug!(
            text_len = reply.text.len(),
            tool_calls = reply.tool_calls.len(),
            history = self.messages.len(),
            "Recorded assistant reply"
        );
        Ok(reply)
    }

    /// `stream_chat_with_tools` without tools, returning the reply text.
    pub async fn chat(&mut self, cancel: &CancellationToken, user_input: &str) -> Result<String, Error> {
        let reply = self
            .stream_chat_with_tools(cancel, user_input, &[], &mut |_: &str| {}, None)
            .await?;
        Ok(reply.text)
    }

    /// Replace everything between the system prompt and the most recent
    /// messages with one summary system message. An earlier summary is
    /// folded into the new one. Returns `false` when the history is too
    /// short to bother.
    pub async fn summarize(&mut self, cancel: &CancellationToken) -> Result<bool, ProviderError> {
        let total = self.messages.len();
        let start = usize::from(self.system_prompt().is_some());
        if total < self.min_messages_to_summarize || total <= start + self.keep_recent {
            return Ok(false);
        }
        let split = total - self.keep_recent;

        let mut prompt = String::from(SUMMARY_INSTRUCTION);
        for msg in &self.messages[start..split] {
            prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }
        let request = [Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(prompt)];

        let summary = self.provider.chat(cancel, &request).await?;

        let recent = self.messages.split_off(split);
        self.messages.truncate(start);
        self.messages.push(Message::system(format!("{SUMMARY_PREFIX}{summary}")));
        self.messages.extend(recent);

        info!(summarized = split - start, kept = self.keep_recent, "Summarized conversation history");
        Ok(true)
    }
}

fn is_summary(message: &Message) -> bool {
    message.role == Role::System && message.content.starts_with(SUMMARY_PREFIX)
}
