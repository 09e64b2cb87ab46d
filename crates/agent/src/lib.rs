//! The diskdoc agent: conversation context and the tool-using task loop.
//!
//! The loop follows a **Reply → Dispatch → Feed back** cycle:
//!
//! 1. **Install** the system prompt (role, skill list, tool list)
//! 2. **Stream** a reply over the full history via the configured provider
//! 3. **If tool calls**: run them through the caller's executor and send the
//!    results back as the next user turn
//! 4. **If text only**: the task is done
//!
//! The loop stops after a fixed number of rounds even if the model keeps
//! asking for tools.

pub mod context;
pub mod loop_runner;
pub mod skill;

#[cfg(test)]
mod test_helpers;

pub use context::{ContextManager, FunctionCall, Reply, format_tool_result, function_call_marker, parse_function_calls};
pub use loop_runner::{AgentLoop, PROGRESS_CHUNK};
pub use skill::{Skill, SkillSet};
