//! LLM Provider implementations for codeloop.
//!
//! All providers implement the `codeloop_core::Provider` trait and share
//! the SSE pump in [`sse`] and the tool-call reassembly in [`assembler`].
//! [`build_from_config`] selects the adapter named by configuration.

pub mod anthropic;
pub mod assembler;
pub mod openai_compat;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use codeloop_config::ProviderConfig;
use codeloop_core::error::ProviderError;
use codeloop_core::provider::Provider;

pub use anthropic::AnthropicProvider;
pub use assembler::ToolCallAssembler;
pub use openai_compat::OpenAiCompatProvider;

/// Context window used when a model is not in the table.
pub const FALLBACK_CONTEXT_WINDOW: u32 = 128_000;

/// Look up the context window for a model name.
pub fn context_window_for(model: &str) -> u32 {
    let model = model.to_ascii_lowercase();
    let model = model.rsplit('/').next().unwrap_or(&model);

    if model.starts_with("claude") {
        200_000
    } else if model.starts_with("gpt-4.1") {
        1_047_576
    } else if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") {
        128_000
    } else if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        200_000
    } else if model.starts_with("gpt-3.5") {
        16_385
    } else {
        FALLBACK_CONTEXT_WINDOW
    }
}

/// Shared HTTP client settings.
///
/// No overall request timeout: streams legitimately run for minutes and
/// are bounded by cancellation instead.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Build the provider named by `config.kind`.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config.kind.as_str() {
        "anthropic" => {
            let key = config.api_key.clone().ok_or_else(|| {
                ProviderError::NotConfigured(
                    "Anthropic API key missing (set ANTHROPIC_API_KEY or provider.api_key)".into(),
                )
            })?;
            let mut provider = AnthropicProvider::new(key);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url.as_str());
            }
            if let Some(model) = &config.model {
                provider = provider.with_model(model.as_str());
            }
            if let Some(window) = config.context_window {
                provider = provider.with_context_window(window);
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let mut provider = match (&config.api_key, &config.base_url) {
                (Some(key), Some(url)) => OpenAiCompatProvider::new("openai", url.as_str(), key.as_str()),
                (Some(key), None) => OpenAiCompatProvider::openai(key.as_str()),
                // Local servers (Ollama, vLLM) usually need no key
                (None, Some(url)) => OpenAiCompatProvider::new("openai", url.as_str(), "none"),
                (None, None) => {
                    return Err(ProviderError::NotConfigured(
                        "OpenAI API key missing (set OPENAI_API_KEY or provider.api_key)".into(),
                    ));
                }
            };
            if let Some(model) = &config.model {
                provider = provider.with_model(model.as_str());
            }
            if let Some(window) = config.context_window {
                provider = provider.with_context_window(window);
            }
            Ok(Arc::new(provider))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "Unknown provider kind: {other}"
        ))),
    }
}
