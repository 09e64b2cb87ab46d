//! The request/response plumbing both HTTP providers share: rate-limit
//! admission, cancellable send, status handling, and driving the body
//! through a `StreamDecoder`.

use std::sync::Arc;
use std::time::Duration;

use diskdoc_core::error::ProviderError;
use diskdoc_core::message::Message;
use diskdoc_core::provider::{StreamEvent, TextSink, ToolCallSink};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rate_limit::{RateLimitObserver, RateLimiter};
use crate::sse::{SseStream, StreamDecoder};

/// Request timeout for streaming calls. Long tool-heavy replies can take
/// several minutes.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Rate-limit settings attached to a provider.
#[derive(Clone, Default)]
pub(crate) struct Admission {
    pub limiter: Option<Arc<RateLimiter>>,
    pub observer: Option<RateLimitObserver>,
}

impl Admission {
    /// Wait for capacity to send `messages`. A provider without a limiter
    /// admits immediately.
    pub async fn admit(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
    ) -> Result<(), ProviderError> {
        match &self.limiter {
            Some(limiter) => {
                let tokens = diskdoc_core::estimate_tokens(messages) as u64;
                limiter.wait(cancel, tokens, self.observer.as_ref()).await
            }
            None if cancel.is_cancelled() => Err(ProviderError::Cancelled),
            None => Ok(()),
        }
    }

    pub fn record_quota(&self, response: &reqwest::Response, tokens_key: &str, requests_key: &str) {
        if let Some(limiter) = &self.limiter {
            limiter.update_from_headers(response.headers(), tokens_key, requests_key);
        }
    }
}

/// Send `request`, aborting with `Cancelled` if `cancel` fires first.
pub(crate) async fn send(
    cancel: &CancellationToken,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = request.send() => result.map_err(|e| ProviderError::Network(e.to_string())),
    }
}

/// Turn a non-2xx response into `ApiError` carrying the body verbatim.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status = status.as_u16(), body = %body, "API error");
    Err(ProviderError::ApiError {
        status_code: status.as_u16(),
        message: body,
    })
}

/// Read the body to its end, decoding events and forwarding them to the
/// callbacks in the order received.
pub(crate) async fn drive<D: StreamDecoder>(
    cancel: &CancellationToken,
    response: reqwest::Response,
    decoder: D,
    on_text: TextSink<'_>,
    mut on_tool_call: Option<ToolCallSink<'_>>,
) -> Result<(), ProviderError> {
    let mut stream = SseStream::new(decoder);
    let mut body = response.bytes_stream();

    while !stream.is_finished() {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            next = body.next() => next,
        };
        let events = match next {
            Some(Ok(bytes)) => stream.feed(&bytes),
            Some(Err(e)) => return Err(ProviderError::StreamInterrupted(e.to_string())),
            None => stream.finish(),
        };

        for event in events {
            match event {
                StreamEvent::TextDelta(text) => on_text(&text),
                StreamEvent::ToolCallCompleted(call) => {
                    debug!(tool = %call.name, id = %call.id, "Tool call completed");
                    if let Some(sink) = on_tool_call.as_deref_mut() {
                        sink(call);
                    }
                }
                StreamEvent::ToolCallStarted { index, id, name } => {
                    trace!(index, id = %id, name = %name, "Tool call started");
                }
                StreamEvent::ToolCallArgumentChunk { index, fragment } => {
                    trace!(index, len = fragment.len(), "Tool call argument chunk");
                }
                StreamEvent::Error(kind) => return Err(kind.into()),
                StreamEvent::Done => {}
            }
        }
    }
    Ok(())
}
