//! Tool types: the catalog sent to the model and the calls it sends back.
//!
//! The agent loop never executes tools itself. It hands each completed
//! `ToolCall` to an injected `ToolExecutor`, which may prompt the operator
//! for approval before doing anything.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use crate::error::ToolError;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON-schema-like document describing the input object
    pub input_schema: Value,
}

/// A request from the model to run a named tool.
///
/// Built incrementally while streaming; only emitted once both `id` and
/// `name` are non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID assigned by the vendor
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed input object
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl ToolCall {
    /// Look up a string argument.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// Look up a required string argument.
    pub fn require_str(&self, key: &str) -> std::result::Result<&str, ToolError> {
        self.str_arg(key).ok_or_else(|| {
            ToolError::InvalidArguments(format!("{}: missing string argument '{key}'", self.name))
        })
    }
}

/// Executes tool calls on behalf of the agent loop.
///
/// Errors are recorded into the transcript for that one call; they never
/// abort the loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> std::result::Result<String, ToolError>;
}

/// A single locally implemented capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "execute_command").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: &Map<String, Value>) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of locally implemented tools, usable as a `ToolExecutor`.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(&call.input).await
    }
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        input_schema,
    }
}

/// The storage-troubleshooting tool catalog offered to the model.
pub fn default_catalog() -> Vec<ToolDefinition> {
    vec![
        definition(
            "execute_command",
            "Run a shell command. The operator must approve each command before it runs.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" },
                    "description": { "type": "string", "description": "Why this command is needed" }
                },
                "required": ["command", "description"]
            }),
        ),
        definition(
            "read_file",
            "Read a file and return its contents.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path of the file to read" }
                },
                "required": ["path"]
            }),
        ),
        definition(
            "write_file",
            "Create or modify a file. A backup is taken before the change.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path of the file to write" },
                    "content": { "type": "string", "description": "New file contents" },
                    "description": { "type": "string", "description": "Why the file is being changed" }
                },
                "required": ["path", "content", "description"]
            }),
        ),
        definition(
            "search_web",
            "Search the web for similar storage incidents and known fixes.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }),
        ),
        definition(
            "monitor_log",
            "Tail, search, filter or summarize a log file.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Log file path" },
                    "action": {
                        "type": "string",
                        "description": "One of 'tail', 'search', 'filter', 'summarize'"
                    },
                    "pattern": {
                        "type": "string",
                        "description": "Pattern for the 'search' and 'filter' actions"
                    }
                },
                "required": ["path", "action"]
            }),
        ),
        definition(
            "ask_user",
            "Ask the operator for more information or a confirmation.",
            json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "Question for the operator" }
                },
                "required": ["question"]
            }),
        ),
    ]
}
