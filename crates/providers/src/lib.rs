//! Model backend implementations for orbit.
//!
//! All providers implement the `orbit_core::Provider` trait.
//! [`build_provider`] selects and constructs one from configuration.

pub mod openai_compat;
pub mod sse;

pub use openai_compat::OpenAiCompatProvider;
pub use sse::{SseEvent, SseParser};

use orbit_config::AppConfig;
use orbit_core::Provider;
use std::sync::Arc;

/// Build the configured provider.
///
/// Fails with a configuration error when no API key is available, before
/// any request is attempted.
pub fn build_provider(config: &AppConfig) -> orbit_core::Result<Arc<dyn Provider>> {
    let api_key = config.require_api_key()?;
    let name = if config.base_url.contains("openrouter.ai") {
        "openrouter"
    } else {
        "openai-compatible"
    };
    let provider = OpenAiCompatProvider::new(name, &config.base_url, api_key)?;
    tracing::debug!(provider = name, base_url = %config.base_url, "Provider configured");
    Ok(Arc::new(provider))
}
