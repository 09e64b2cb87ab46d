//! Agent configuration and loop state types.

use serde::{Deserialize, Serialize};

/// Configuration for the agent's behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum request/response rounds per task (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// History length above which older turns are summarized
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,

    /// Number of most recent messages kept verbatim by summarization
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Summarization never runs on fewer messages than this
    #[serde(default = "default_min_messages_to_summarize")]
    pub min_messages_to_summarize: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_summarize_threshold() -> usize {
    30
}
fn default_keep_recent() -> usize {
    5
}
fn default_min_messages_to_summarize() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            summarize_threshold: default_summarize_threshold(),
            keep_recent: default_keep_recent(),
            min_messages_to_summarize: default_min_messages_to_summarize(),
        }
    }
}

/// Where the agent loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting on a model reply
    Iterating,
    /// Running the tool calls from the last reply
    ToolDispatch,
    /// The model answered without requesting tools
    Done,
    /// The iteration cap was reached while tools were still requested
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Done | LoopState::Aborted)
    }
}

/// How a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// `Done` or `Aborted`
    pub state: LoopState,

    /// Rounds actually performed
    pub iterations: u32,

    /// Tool calls dispatched across all rounds
    pub tool_calls: usize,
}

impl LoopOutcome {
    pub fn completed(&self) -> bool {
        self.state == LoopState::Done
    }
}
