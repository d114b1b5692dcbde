//! Provider implementations
//!
//! All reference endpoints are OpenAI-compatible; the factory picks the
//! adapter from the endpoint URL.

pub mod adapters;
pub mod base;
pub mod openai_compatible;

use crate::error::Result;
use crate::llm::provider::{ModelProvider, ProviderEndpointConfig};
use adapters::{CloudEndpoint, LmStudioEndpoint, OllamaEndpoint};
use openai_compatible::OpenAICompatibleProvider;
use std::sync::Arc;

/// Build a provider from its endpoint registration.
///
/// The two well-known local ports get their dedicated adapters; everything
/// else is treated as a cloud endpoint.
pub fn provider_from_config(
    config: &ProviderEndpointConfig,
    timeout_secs: u64,
) -> Result<Arc<dyn ModelProvider>> {
    let provider: Arc<dyn ModelProvider> = if config.url.contains(":11434") {
        Arc::new(OpenAICompatibleProvider::new(
            OllamaEndpoint::new(config),
            config.clone(),
            timeout_secs,
        )?)
    } else if config.url.contains(":1234") {
        Arc::new(OpenAICompatibleProvider::new(
            LmStudioEndpoint::new(config),
            config.clone(),
            timeout_secs,
        )?)
    } else {
        Arc::new(OpenAICompatibleProvider::new(
            CloudEndpoint::new(config),
            config.clone(),
            timeout_secs,
        )?)
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_by_url() {
        let ollama = provider_from_config(&ProviderEndpointConfig::ollama("localhost"), 30);
        assert!(ollama.is_ok());
        assert_eq!(ollama.unwrap().name(), "ollama");

        let studio = provider_from_config(&ProviderEndpointConfig::lm_studio("localhost"), 30);
        assert_eq!(studio.unwrap().name(), "lm-studio");

        let cloud = provider_from_config(
            &ProviderEndpointConfig::cloud("cloud", "https://api.example.com/v1", "k"),
            30,
        );
        assert_eq!(cloud.unwrap().name(), "cloud");
    }
}
