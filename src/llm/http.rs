//! Generic OpenAI-compatible chat completion client.
//!
//! Default implementation of [`LlmClient`]. Every supported provider is
//! reached through an OpenAI-compatible `/chat/completions` endpoint; the
//! base URL per provider can be overridden at construction so deployments
//! can route through a proxy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, ProviderError, ProviderErrorKind};
use super::{ChatMessage, CompletionResponse, LlmClient, Provider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// OpenAI-compatible HTTP client.
pub struct HttpLlmClient {
    client: Client,
    /// Per-provider base URLs (full chat-completions endpoint)
    endpoints: HashMap<Provider, String>,
}

impl HttpLlmClient {
    /// Create a client with the default provider endpoints.
    pub fn new() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            Provider::OpenAi,
            "https://api.openai.com/v1/chat/completions".to_string(),
        );
        endpoints.insert(
            Provider::Anthropic,
            "https://api.anthropic.com/v1/chat/completions".to_string(),
        );
        endpoints.insert(
            Provider::Google,
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions".to_string(),
        );
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoints,
        }
    }

    /// Override the endpoint for a provider (also how `Custom` providers
    /// become reachable).
    pub fn with_endpoint(mut self, provider: Provider, url: impl Into<String>) -> Self {
        self.endpoints.insert(provider, url.into());
        self
    }

    fn endpoint_for(&self, provider: &Provider) -> Result<&str, ProviderError> {
        self.endpoints
            .get(provider)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                ProviderError::unknown(format!("no endpoint configured for provider {}", provider))
            })
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    /// Create a ProviderError from HTTP response status and body.
    fn create_error(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
        match classify_http_status(status) {
            ProviderErrorKind::Auth => ProviderError::auth(body.to_string()).with_status(status),
            ProviderErrorKind::RateLimit => ProviderError::rate_limited(body.to_string(), retry_after),
            ProviderErrorKind::Budget => ProviderError::budget(body.to_string()),
            ProviderErrorKind::Transient => {
                ProviderError::transient(body.to_string()).with_status(status)
            }
            ProviderErrorKind::Unknown => {
                ProviderError::unknown(body.to_string()).with_status(status)
            }
        }
    }
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponseBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        provider: &Provider,
        credential: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = self.endpoint_for(provider)?;
        let request = CompletionRequest { model, messages };

        let response = match self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(ProviderError::transient(format!("request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(ProviderError::transient(format!("connection failed: {}", e)));
                }
                return Err(ProviderError::transient(format!("request failed: {}", e)));
            }
        };

        let status = response.status().as_u16();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(Self::create_error(status, &body, retry_after));
        }

        let parsed: CompletionResponseBody = serde_json::from_str(&body).map_err(|e| {
            ProviderError::unknown(format!("failed to parse provider response: {}", e))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::unknown("no choices in provider response"))?;

        Ok(CompletionResponse {
            text,
            model: parsed.model,
        })
    }
}
