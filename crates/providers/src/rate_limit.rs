//! Fixed-window admission control for outgoing LLM requests.
//!
//! One `RateLimiter` bounds both the estimated tokens and the number of
//! requests sent per window. It is shared behind an `Arc` by every provider
//! (and every agent task) that should draw from the same quota.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use diskdoc_core::error::ProviderError;
use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Notified with `(wait, true)` when a caller starts waiting for capacity
/// and `(Duration::ZERO, false)` when it stops. Advisory only.
pub type RateLimitObserver = Arc<dyn Fn(Duration, bool) + Send + Sync>;

#[derive(Debug)]
struct Window {
    max_tokens: u64,
    max_requests: u64,
    started: Option<Instant>,
    used_tokens: u64,
    used_requests: u64,
}

/// Token and request budget per window. A maximum of zero disables that
/// dimension.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_tokens: u64, max_requests: u64) -> Self {
        Self {
            window,
            state: Mutex::new(Window {
                max_tokens,
                max_requests,
                started: None,
                used_tokens: 0,
                used_requests: 0,
            }),
        }
    }

    /// Build a limiter from the `[rate_limit]` config section.
    pub fn from_config(config: &diskdoc_config::RateLimitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.window_secs),
            config.tokens_per_window,
            config.requests_per_window,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // The guarded counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to admit one request costing `tokens`.
    ///
    /// Returns `Duration::ZERO` and commits the reservation when it fits,
    /// otherwise the time left until the current window resets.
    pub fn reserve(&self, tokens: u64) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.started {
            Some(started) => now.duration_since(started) >= self.window,
            None => true,
        };
        if expired {
            state.started = Some(now);
            state.used_tokens = 0;
            state.used_requests = 0;
        }

        let tokens_ok =
            state.max_tokens == 0 || state.used_tokens.saturating_add(tokens) <= state.max_tokens;
        let requests_ok = state.max_requests == 0 || state.used_requests < state.max_requests;
        if tokens_ok && requests_ok {
            state.used_tokens = state.used_tokens.saturating_add(tokens);
            state.used_requests += 1;
            return Duration::ZERO;
        }

        match state.started {
            Some(started) => (started + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Block until `tokens` can be admitted or `cancel` fires.
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
        tokens: u64,
        observer: Option<&RateLimitObserver>,
    ) -> Result<(), ProviderError> {
        let report = |wait: Duration, waiting: bool| {
            if let Some(observer) = observer {
                observer(wait, waiting);
            }
        };

        let mut warned = false;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let wait = self.reserve(tokens);
            if wait.is_zero() {
                report(Duration::ZERO, false);
                return Ok(());
            }

            if !warned && self.exceeds_window(tokens) {
                let (max_tokens, _) = self.limits();
                warn!(
                    tokens,
                    max_tokens,
                    "Request is larger than the per-window token limit; it waits until the limits change"
                );
                warned = true;
            }

            debug!(wait_ms = wait.as_millis() as u64, tokens, "Rate limit reached, waiting");
            report(wait, true);
            tokio::select! {
                _ = cancel.cancelled() => {
                    report(Duration::ZERO, false);
                    return Err(ProviderError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }
            report(Duration::ZERO, false);
        }
    }

    /// True when `tokens` is over a non-zero per-window token limit, so no
    /// window reset alone can admit it.
    pub fn exceeds_window(&self, tokens: u64) -> bool {
        let (max_tokens, _) = self.limits();
        max_tokens > 0 && tokens > max_tokens
    }

    /// Replace the limits. Zero leaves the corresponding limit unchanged.
    pub fn update_limits(&self, tokens_per_window: u64, requests_per_window: u64) {
        let mut state = self.lock();
        if tokens_per_window > 0 {
            state.max_tokens = tokens_per_window;
        }
        if requests_per_window > 0 {
            state.max_requests = requests_per_window;
        }
    }

    /// Feed vendor quota headers into `update_limits`. Missing or malformed
    /// values are ignored.
    pub fn update_from_headers(&self, headers: &HeaderMap, tokens_key: &str, requests_key: &str) {
        let value = |key: &str| {
            headers
                .get(key)
                .and_then(|v| v.to_str().ok())
                .map(parse_rate_limit_header)
                .unwrap_or(0)
        };
        let (tokens, requests) = (value(tokens_key), value(requests_key));
        if tokens > 0 || requests > 0 {
            debug!(tokens, requests, "Updating rate limits from response headers");
        }
        self.update_limits(tokens, requests);
    }

    /// Current `(max_tokens, max_requests)`.
    pub fn limits(&self) -> (u64, u64) {
        let state = self.lock();
        (state.max_tokens, state.max_requests)
    }
}

/// Parse a quota header value. Values with a `.` are read as floats and
/// truncated; anything unparseable or negative yields 0.
pub fn parse_rate_limit_header(value: &str) -> u64 {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }
    if value.contains('.') {
        if let Ok(f) = value.parse::<f64>() {
            return if f.is_finite() && f > 0.0 { f.trunc() as u64 } else { 0 };
        }
    }
    value.parse::<i64>().map(|n| n.max(0) as u64).unwrap_or(0)
}
