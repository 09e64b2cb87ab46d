//! # diskdoc core
//!
//! Domain types, traits, and error definitions for the diskdoc
//! troubleshooting agent. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! Vendor protocols live behind the `Provider` trait and local capabilities
//! behind `ToolExecutor`, so the agent loop can be exercised with in-memory
//! fakes and multiple agents can share a process without global state.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod token;
pub mod agent;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Message, Role};
pub use provider::{Provider, StreamErrorKind, StreamEvent, TextSink, ToolCallSink};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolExecutor, ToolRegistry, default_catalog};
pub use token::estimate_tokens;
pub use agent::{AgentConfig, LoopOutcome, LoopState};
pub use tokio_util::sync::CancellationToken;
