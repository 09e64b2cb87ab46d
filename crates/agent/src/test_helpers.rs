//! Shared test helpers for context and loop tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use diskdoc_core::error::{ProviderError, ToolError};
use diskdoc_core::message::Message;
use diskdoc_core::provider::{Provider, TextSink, ToolCallSink};
use diskdoc_core::tool::{ToolCall, ToolDefinition, ToolExecutor};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One scripted reply: text chunks, then tool calls, or a failure.
#[derive(Debug, Clone, Default)]
pub struct Round {
    pub chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<ProviderError>,
}

impl Round {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn error(error: ProviderError) -> Self {
        Self { error: Some(error), ..Self::default() }
    }

    pub fn with_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// A provider that replays scripted rounds in order and records every
/// request it receives.
///
/// Once the script is exhausted the `repeat` round (if any) is served
/// forever; otherwise further calls panic.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    repeat: Option<Round>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn shared(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(round: Round) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(VecDeque::new()),
            repeat: Some(round),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call(id: &str, name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            input: match input {
                Value::Object(map) => map,
                _ => Default::default(),
            },
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        _tools: &[ToolDefinition],
        on_text: TextSink<'_>,
        on_tool_call: Option<ToolCallSink<'_>>,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .expect("ScriptedProvider: script exhausted");

        if let Some(error) = round.error {
            return Err(error);
        }
        for chunk in &round.chunks {
            on_text(chunk.as_str());
        }
        if let Some(sink) = on_tool_call {
            for call in round.tool_calls {
                sink(call);
            }
        }
        Ok(())
    }
}

/// Records every call and answers `ok:{name}`, or fails for names listed
/// in `failing`.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<ToolCall>>,
    pub failing: Vec<String>,
}

impl RecordingExecutor {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.name.clone()).collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.contains(&call.name) {
            return Err(ToolError::PermissionDenied {
                tool_name: call.name.clone(),
                reason: "rejected by operator".into(),
            });
        }
        Ok(format!("ok:{}", call.name))
    }
}
