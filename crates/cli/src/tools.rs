//! Local tool implementations and the approval gate in front of them.
//!
//! Only `execute_command` and `read_file` run locally. The other catalog
//! tools report `ToolError::NotFound`, which the agent loop records as a
//! failed result for the model to see.

use async_trait::async_trait;
use diskdoc_core::error::ToolError;
use diskdoc_core::tool::{Tool, ToolCall, ToolExecutor, ToolRegistry};
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Decides whether a command may run.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, call: &ToolCall) -> bool;
}

fn str_arg<'a>(tool: &str, input: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{tool}: missing string argument '{key}'")))
}

/// Runs a command through `sh -c`.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run a shell command and return stdout/stderr."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String, ToolError> {
        let command = str_arg(self.name(), input, "command")?;
        debug!(command = %command, "Executing shell command");

        let output = Command::new("sh")
            .args(["-c", command])
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if output.status.success() {
            if stderr.is_empty() {
                stdout.into_owned()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };
        Ok(text.trim().to_string())
    }
}

/// Reads a whole file as UTF-8 text.
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String, ToolError> {
        let path = str_arg(self.name(), input, "path")?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("{path}: {e}"),
            })
    }
}

/// The tools this binary can run.
pub fn local_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool));
    registry.register(Box::new(FileReadTool));
    registry
}

/// Executes tool calls from the local registry, asking the operator before
/// any command runs unless auto-approval is on.
pub struct ApprovalGate<A> {
    registry: ToolRegistry,
    approver: A,
    auto_approve: bool,
}

impl<A: Approver> ApprovalGate<A> {
    pub fn new(registry: ToolRegistry, approver: A, auto_approve: bool) -> Self {
        Self { registry, approver, auto_approve }
    }
}

#[async_trait]
impl<A: Approver> ToolExecutor for ApprovalGate<A> {
    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        if self.registry.get(&call.name).is_none() {
            return Err(ToolError::NotFound(call.name.clone()));
        }

        let needs_approval = call.name == "execute_command" && !self.auto_approve;
        if needs_approval && !self.approver.approve(call).await {
            info!(tool = %call.name, "Command rejected by operator");
            return Err(ToolError::PermissionDenied {
                tool_name: call.name.clone(),
                reason: "rejected by operator".into(),
            });
        }

        self.registry.execute(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        answer: bool,
        asked: AtomicUsize,
    }

    impl Fixed {
        fn new(answer: bool) -> Self {
            Self { answer, asked: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Approver for Fixed {
        async fn approve(&self, _call: &ToolCall) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            input: input.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn approved_command_runs() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(true), false);
        let output = gate
            .execute(&call("execute_command", json!({"command": "echo hello"})))
            .await
            .unwrap();
        assert_eq!(output, "hello");
        assert_eq!(gate.approver.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_command_is_denied() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(false), false);
        let err = gate
            .execute(&call("execute_command", json!({"command": "rm -rf /tmp/x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn auto_approve_skips_the_prompt() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(false), true);
        let output = gate
            .execute(&call("execute_command", json!({"command": "echo ok"})))
            .await
            .unwrap();
        assert_eq!(output, "ok");
        assert_eq!(gate.approver.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let output = ShellTool
            .execute(json!({"command": "echo oops >&2; exit 3"}).as_object().unwrap())
            .await
            .unwrap();
        assert!(output.starts_with("[exit code: 3]"));
        assert!(output.contains("oops"));
    }

    #[tokio::test]
    async fn read_file_needs_no_approval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        std::fs::write(&path, "UUID=abc / ext4 defaults 0 1\n").unwrap();

        let gate = ApprovalGate::new(local_registry(), Fixed::new(false), false);
        let output = gate
            .execute(&call("read_file", json!({"path": path.to_str().unwrap()})))
            .await
            .unwrap();
        assert!(output.contains("ext4"));
        assert_eq!(gate.approver.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_file_is_an_execution_failure() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(true), false);
        let err = gate
            .execute(&call("read_file", json!({"path": "/nonexistent/diskdoc"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn unavailable_tools_are_not_found() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(true), true);
        let err = gate
            .execute(&call("search_web", json!({"query": "xfs corruption"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(ref name) if name == "search_web"));
    }

    #[tokio::test]
    async fn missing_argument_is_invalid() {
        let gate = ApprovalGate::new(local_registry(), Fixed::new(true), true);
        let err = gate.execute(&call("read_file", json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
