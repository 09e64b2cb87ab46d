//! Line-oriented access to the terminal.
//!
//! Chat input and approval prompts both read from stdin, so they share
//! one buffered reader.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use diskdoc_core::tool::ToolCall;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::tools::Approver;

#[derive(Clone)]
pub struct Console {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
        }
    }

    /// Print `prompt` and read one line. `None` at end of input.
    pub async fn read_line(&self, prompt: &str) -> std::io::Result<Option<String>> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        self.lines.lock().await.next_line().await
    }
}

#[async_trait]
impl Approver for Console {
    async fn approve(&self, call: &ToolCall) -> bool {
        let command = call.str_arg("command").unwrap_or_default();
        let reason = call.str_arg("description").unwrap_or_default();

        println!();
        println!("  Command: {command}");
        if !reason.is_empty() {
            println!("  Reason:  {reason}");
        }
        match self.read_line("  Run it? [y/N] ").await {
            Ok(Some(answer)) => is_yes(&answer),
            _ => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
