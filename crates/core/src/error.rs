//! Error types for the diskdoc domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` ties them together.

use thiserror::Error;

/// The top-level error type for all diskdoc operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The model returned neither text nor tool calls.
    #[error("The model returned an empty response (no text and no tool calls)")]
    EmptyResponse,

    /// No skill with this name is registered.
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Provider(ProviderError::Cancelled))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// No credential configured. Raised before any network activity.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The outgoing request is malformed or empty.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Non-2xx HTTP status. `message` is the response body, verbatim.
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    /// Vendor error event or an oversized SSE record.
    #[error("Stream decode error: {0}")]
    StreamDecode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
