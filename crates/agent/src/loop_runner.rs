//! The agent reasoning loop implementation.
//!
//! Each round streams one reply over the full history. Tool calls in that
//! reply are dispatched through the caller's executor, and their outcomes
//! go back to the model as the next user turn.

use std::sync::Arc;

use diskdoc_core::agent::{AgentConfig, LoopOutcome, LoopState};
use diskdoc_core::error::Error;
use diskdoc_core::message::Role;
use diskdoc_core::provider::{Provider, TextSink};
use diskdoc_core::tool::{ToolCall, ToolDefinition, ToolExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextManager, format_tool_result};
use crate::skill::SkillSet;

/// Sent through `on_chunk` after each tool round of a streamed task.
pub const PROGRESS_CHUNK: &str = "\n\n[tools executed, continuing with the next step...]\n\n";

const ROLE_PROMPT: &str = "\
You are an autonomous agent specialised in diagnosing and fixing storage problems.

Your role:
1. Analyse and diagnose the storage problem the user describes
2. Choose and run the tools you need on your own
3. Plan multi-step work and carry it out in order
4. Inspect intermediate results to decide the next step
5. Keep using tools until the task is complete

Rules:
- Commands need operator approval before they run unless auto-approval is enabled
- Files are backed up before they are modified
- Confirm risky operations with the user

";

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// Conversation history, owned by this task
    context: ContextManager,

    /// Tool catalog offered on every round
    tools: Vec<ToolDefinition>,

    /// Maximum request/response rounds per task
    max_iterations: u32,

    /// Skill catalog listed in the system prompt
    skills: SkillSet,

    /// Names of activated skills, re-applied on every task
    active: Vec<String>,
}

impl AgentLoop {
    /// Create a loop with default settings and the built-in skills.
    pub fn new(provider: Arc<dyn Provider>, tools: Vec<ToolDefinition>) -> Self {
        Self::with_config(provider, tools, &AgentConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn Provider>,
        tools: Vec<ToolDefinition>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            context: ContextManager::with_config(provider, config),
            tools,
            max_iterations: config.max_iterations,
            skills: SkillSet::defaults(),
            active: Vec::new(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Replace the skill catalog.
    pub fn with_skills(mut self, skills: SkillSet) -> Self {
        self.skills = skills;
        self.active.retain(|name| self.skills.get(name).is_some());
        self
    }

    pub fn skills(&self) -> &SkillSet {
        &self.skills
    }

    /// Activate the named skill: its body is appended to the live system
    /// prompt, or added as a system message when there is none yet.
    /// Activating a skill twice is a no-op.
    pub fn activate_skill(&mut self, name: &str) -> Result<(), Error> {
        let content = self.skills.activate(name)?.to_string();
        if self.active.iter().any(|n| n == name) {
            return Ok(());
        }
        match self.context.system_prompt().map(|current| format!("{current}\n\n{content}")) {
            Some(prompt) => self.context.set_system_prompt(prompt),
            None => self.context.add_message(Role::System, content),
        }
        info!(skill = name, "Skill activated");
        self.active.push(name.to_string());
        Ok(())
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextManager {
        &mut self.context
    }

    /// The system prompt installed at the start of every task.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(ROLE_PROMPT);

        prompt.push_str(&self.skills.metadata());
        if !self.skills.is_empty() {
            prompt.push('\n');
        }

        prompt.push_str("Available tools:\n");
        for tool in &self.tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }

        for name in &self.active {
            if let Some(skill) = self.skills.get(name) {
                prompt.push_str("\n\n");
                prompt.push_str(&skill.content);
            }
        }
        prompt
    }

    /// Run `task`, streaming every text chunk to `on_chunk`.
    ///
    /// A separator chunk is sent after each tool round. Reaching the
    /// iteration cap is not an error; the outcome's state is `Aborted`.
    pub async fn stream_task(
        &mut self,
        cancel: &CancellationToken,
        task: &str,
        on_chunk: TextSink<'_>,
        executor: &dyn ToolExecutor,
    ) -> Result<LoopOutcome, Error> {
        self.run(cancel, task, on_chunk, executor, true).await
    }

    /// Run `task` without streaming and return the text of every round,
    /// each followed by a blank line.
    pub async fn execute_task(
        &mut self,
        cancel: &CancellationToken,
        task: &str,
        executor: &dyn ToolExecutor,
    ) -> Result<(String, LoopOutcome), Error> {
        let mut transcript = String::new();
        let outcome = self
            .run(
                cancel,
                task,
                &mut |chunk: &str| transcript.push_str(chunk),
                executor,
                false,
            )
            .await?;
        Ok((transcript, outcome))
    }

    async fn run(
        &mut self,
        cancel: &CancellationToken,
        task: &str,
        on_chunk: TextSink<'_>,
        executor: &dyn ToolExecutor,
        streaming: bool,
    ) -> Result<LoopOutcome, Error> {
        info!(
            tools = self.tools.len(),
            max_iterations = self.max_iterations,
            history = self.context.len(),
            "Starting task"
        );

        let prompt = self.system_prompt();
        self.context.set_system_prompt(prompt);

        let mut outcome = LoopOutcome {
            state: LoopState::Iterating,
            iterations: 0,
            tool_calls: 0,
        };
        let mut input = task.to_string();

        while outcome.iterations < self.max_iterations {
            outcome.iterations += 1;
            debug!(iteration = outcome.iterations, "Agent loop iteration");

            let reply = match self
                .context
                .stream_chat_with_tools(cancel, &input, &self.tools, &mut *on_chunk, None)
                .await
            {
                Ok(reply) => reply,
                Err(e) if e.is_cancelled() => {
                    debug!(iteration = outcome.iterations, "Task cancelled");
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            if reply.is_empty() {
                warn!(iteration = outcome.iterations, "Model returned an empty reply");
                return Err(Error::EmptyResponse);
            }
            if !streaming {
                on_chunk("\n\n");
            }

            if reply.tool_calls.is_empty() {
                outcome.state = LoopState::Done;
                break;
            }

            outcome.state = LoopState::ToolDispatch;
            debug!(tool_count = reply.tool_calls.len(), "Executing tool calls");
            outcome.tool_calls += reply.tool_calls.len();
            input = dispatch(executor, &reply.tool_calls).await;
            outcome.state = LoopState::Iterating;

            if streaming {
                on_chunk(PROGRESS_CHUNK);
            }
        }

        if outcome.state != LoopState::Done {
            // The last round's tool results never reached the model.
            self.context.add_message(Role::User, input);
            outcome.state = LoopState::Aborted;
            warn!(
                iterations = outcome.iterations,
                tool_calls = outcome.tool_calls,
                "Max iterations reached while tools were still requested"
            );
        } else {
            info!(
                iterations = outcome.iterations,
                tool_calls = outcome.tool_calls,
                "Task complete"
            );
        }
        Ok(outcome)
    }
}

/// Run every call in order and join the outcome records with a blank line.
async fn dispatch(executor: &dyn ToolExecutor, calls: &[ToolCall]) -> String {
    let mut records = Vec::with_capacity(calls.len());
    for call in calls {
        let record = match executor.execute(call).await {
            Ok(output) => format_tool_result(&call.name, &output, true),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                format_tool_result(&call.name, &format!("Error: {e}"), false)
            }
        };
        records.push(record);
    }
    records.join("\n\n")
}
