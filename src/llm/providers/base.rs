//! Base HTTP provider implementation
//!
//! Common HTTP client functionality shared by all OpenAI-speaking endpoints.

use crate::error::{RagError, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Base HTTP client for provider endpoints
pub struct HttpProviderClient {
    client: Client,
    timeout: Duration,
}

impl HttpProviderClient {
    /// Create a new HTTP provider client
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::InvalidConfiguration(format!("http client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Execute a POST request with JSON body
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, String)],
    ) -> Result<R> {
        debug!("Making POST request to: {}", url);

        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(*key, value.as_str());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| RagError::Timeout(format!("POST {}", url)))?
            .map_err(|e| RagError::Provider(format!("connection failed: {}", e)))?;

        self.handle_response(response).await
    }

    /// Execute a GET request
    pub async fn get<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<R> {
        debug!("Making GET request to: {}", url);

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, value.as_str());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| RagError::Timeout(format!("GET {}", url)))?
            .map_err(|e| RagError::Provider(format!("connection failed: {}", e)))?;

        self.handle_response(response).await
    }

    /// Handle HTTP response and deserialize
    async fn handle_response<R: DeserializeOwned>(&self, response: Response) -> Result<R> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {} error", status));

            error!("Provider API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                429 => RagError::RateLimited(error_text),
                408 | 504 => RagError::Timeout(error_text),
                _ => RagError::Provider(format!("HTTP {}: {}", status, error_text)),
            });
        }

        response
            .json()
            .await
            .map_err(|e| RagError::Provider(format!("invalid response: {}", e)))
    }
}

/// Common trait for OpenAI-compatible API endpoints
pub trait OpenAIEndpoint: Send + Sync {
    /// Get the base URL for the endpoint (the `/v1` root)
    fn base_url(&self) -> &str;

    /// Get the API key
    fn api_key(&self) -> Option<&str>;

    /// Build auth headers
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/json".to_string())];
        if let Some(key) = self.api_key() {
            headers.push(("Authorization", format!("Bearer {}", key)));
        }
        headers
    }

    /// Build full URL for an endpoint path
    fn build_url(&self, endpoint: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}
