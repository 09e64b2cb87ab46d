//! Text records embedded in the conversation.
//!
//! Tool requests are written into the assistant turn as
//! `<function_call>{json}</function_call>` markers, and tool outcomes go
//! back to the model as `<tool_result ...>` records in a user turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CALL_OPEN: &str = "<function_call>";
const CALL_CLOSE: &str = "</function_call>";

/// A tool request recovered from (or written to) a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

#[derive(Serialize)]
struct MarkerRef<'a> {
    name: &'a str,
    input: &'a Map<String, Value>,
}

/// Render the marker appended to an assistant turn for one tool call,
/// including its leading newline.
pub fn function_call_marker(name: &str, input: &Map<String, Value>) -> String {
    let json = serde_json::to_string(&MarkerRef { name, input })
        .unwrap_or_else(|_| format!(r#"{{"name":{},"input":{{}}}}"#, Value::from(name)));
    format!("\n{CALL_OPEN}{json}{CALL_CLOSE}")
}

/// Split a recorded assistant turn into the tool calls it records and the
/// remaining prose (trimmed). Markers whose body is not valid JSON are left
/// in the text.
///
/// This reads transcripts after the fact. Live tool calls arrive through
/// the provider's tool-call callback and are never recovered from text.
pub fn parse_function_calls(text: &str) -> (Vec<FunctionCall>, String) {
    let mut calls = Vec::new();
    let mut prose = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(CALL_OPEN) {
        let body_start = start + CALL_OPEN.len();
        let Some(len) = rest[body_start..].find(CALL_CLOSE) else {
            break;
        };
        let body = &rest[body_start..body_start + len];
        let end = body_start + len + CALL_CLOSE.len();

        match serde_json::from_str::<FunctionCall>(body) {
            Ok(call) => {
                prose.push_str(&rest[..start]);
                calls.push(call);
            }
            Err(_) => prose.push_str(&rest[..end]),
        }
        rest = &rest[end..];
    }
    prose.push_str(rest);

    (calls, prose.trim().to_string())
}

/// Render one tool outcome for the model.
pub fn format_tool_result(name: &str, result: &str, success: bool) -> String {
    let status = if success { "success" } else { "failure" };
    format!(r#"<tool_result name="{name}" status="{status}">{result}</tool_result>"#)
}
