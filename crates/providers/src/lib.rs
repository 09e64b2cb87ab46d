//! LLM Provider implementations for diskdoc.
//!
//! Both vendors implement the `diskdoc_core::Provider` trait. Each one
//! pairs a wire-format encoder with a `StreamDecoder` and draws request
//! capacity from a shared `RateLimiter`.

pub mod anthropic;
pub mod openai_compat;
pub mod rate_limit;
pub mod router;
pub mod sse;
mod transport;

pub use anthropic::{AnthropicDecoder, AnthropicProvider};
pub use openai_compat::{OpenAiCompatProvider, OpenAiDecoder};
pub use rate_limit::{RateLimitObserver, RateLimiter, parse_rate_limit_header};
pub use router::{build_from_config, build_with_limiter};
pub use sse::{SseStream, StreamDecoder, ToolCallAssembler};
