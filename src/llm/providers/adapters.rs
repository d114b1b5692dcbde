//! Endpoint adapters for the reference provider kinds
//!
//! All three speak the OpenAI `/v1` surface; they differ only in root URL
//! and authentication.

use crate::llm::provider::ProviderEndpointConfig;
use crate::llm::providers::base::OpenAIEndpoint;

/// Remote cloud endpoint authenticated by API key
pub struct CloudEndpoint {
    base_url: String,
    api_key: Option<String>,
}

impl CloudEndpoint {
    pub fn new(config: &ProviderEndpointConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

impl OpenAIEndpoint for CloudEndpoint {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

/// Local Ollama server (`http://host:11434/v1`), no authentication
pub struct OllamaEndpoint {
    base_url: String,
}

impl OllamaEndpoint {
    pub fn new(config: &ProviderEndpointConfig) -> Self {
        Self {
            base_url: config.url.clone(),
        }
    }
}

impl OpenAIEndpoint for OllamaEndpoint {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Option<&str> {
        None
    }
}

/// Local LM Studio server (`http://host:1234/v1`), no authentication
pub struct LmStudioEndpoint {
    base_url: String,
}

impl LmStudioEndpoint {
    pub fn new(config: &ProviderEndpointConfig) -> Self {
        Self {
            base_url: config.url.clone(),
        }
    }
}

impl OpenAIEndpoint for LmStudioEndpoint {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_endpoint_auth() {
        let config = ProviderEndpointConfig::cloud("cloud", "https://api.example.com/v1", "sk-x");
        let endpoint = CloudEndpoint::new(&config);
        assert_eq!(endpoint.api_key(), Some("sk-x"));
        assert_eq!(
            endpoint.build_url("embeddings"),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[test]
    fn test_local_endpoints_anonymous() {
        let config = ProviderEndpointConfig::ollama("localhost");
        let endpoint = OllamaEndpoint::new(&config);
        assert!(endpoint.api_key().is_none());
        assert_eq!(endpoint.base_url(), "http://localhost:11434/v1");

        let config = ProviderEndpointConfig::lm_studio("localhost");
        let endpoint = LmStudioEndpoint::new(&config);
        assert_eq!(endpoint.base_url(), "http://localhost:1234/v1");
    }
}
