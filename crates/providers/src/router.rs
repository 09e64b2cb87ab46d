//! Provider selection from configuration.
//!
//! The vendor is chosen once, here. Nothing downstream switches on the
//! provider name.

use std::sync::Arc;

use diskdoc_config::AppConfig;
use diskdoc_core::error::ProviderError;
use diskdoc_core::provider::Provider;
use tracing::info;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::rate_limit::RateLimiter;

/// Build the provider named by `llm_provider`, with a rate limiter sized
/// from the `[rate_limit]` section.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    build_with_limiter(config, limiter)
}

/// Like `build_from_config`, but draws from a limiter shared with other
/// providers.
pub fn build_with_limiter(
    config: &AppConfig,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match config.llm_provider.as_str() {
        "anthropic" => Arc::new(
            AnthropicProvider::from_config(&config.anthropic).with_rate_limiter(limiter),
        ),
        "openai" => Arc::new(
            OpenAiCompatProvider::from_config(&config.openai).with_rate_limiter(limiter),
        ),
        other => {
            return Err(ProviderError::Validation(format!("unknown LLM provider: {other}")));
        }
    };

    info!(provider = provider.name(), model = provider.model(), "Provider configured");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_provider() {
        let config = AppConfig::default();
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), config.anthropic.model);
    }

    #[test]
    fn builds_openai_provider() {
        let mut config = AppConfig::default();
        config.llm_provider = "openai".into();
        config.openai.model = "gpt-4o-mini".into();
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = AppConfig::default();
        config.llm_provider = "bard".into();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::Validation(ref m) if m.contains("bard")));
    }
}
