//! LLM capability module.
//!
//! Provides a trait-based abstraction over chat providers. The core only
//! ever talks to the [`LlmClient`] trait; a single OpenAI-compatible HTTP
//! adapter ships as the default implementation, and tests use a scripted
//! client.

mod error;
mod http;

pub use error::{classify_http_status, ProviderError, ProviderErrorKind};
pub use http::HttpLlmClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported LLM providers.
///
/// Unrecognized names round-trip as `Custom` so a deployment can point an
/// OpenAI-compatible endpoint at any provider name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Custom(String),
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.as_str() {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "google" => Self::Google,
            _ => Self::Custom(s),
        }
    }
}

impl From<Provider> for String {
    fn from(p: Provider) -> Self {
        p.as_str().to_string()
    }
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Custom(s) => s,
        }
    }

    /// Fixed per-provider rate in hundredths of a cent per 1000 tokens,
    /// used by the cost estimator (provider metering is not consulted).
    pub fn rate_per_1k_tokens_centicents(&self) -> u64 {
        match self {
            Self::OpenAi => 300,
            Self::Anthropic => 450,
            Self::Google => 200,
            Self::Custom(_) => 300,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Response from a completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    /// Model reported by the provider, if any
    pub model: Option<String>,
}

/// Trait for LLM provider clients.
///
/// The call is stateless: provider, credential, and model arrive with every
/// request, so one client instance serves every agent configuration.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and return the assistant text.
    async fn complete(
        &self,
        provider: &Provider,
        credential: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<CompletionResponse, ProviderError>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted LLM client for tests: responses are queued per model name,
    //! and every call is recorded.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub provider: Provider,
        pub model: String,
        pub messages: Vec<ChatMessage>,
    }

    #[derive(Default)]
    pub struct ScriptedLlm {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedLlm {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful response for calls with `model`.
        pub fn respond(self, model: &str, text: &str) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(Ok(text.to_string()));
            self
        }

        /// Queue a failure for calls with `model`.
        pub fn fail(self, model: &str, error: ProviderError) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(Err(error));
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            provider: &Provider,
            _credential: &str,
            messages: &[ChatMessage],
            model: &str,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.lock().unwrap().push(RecordedCall {
                provider: provider.clone(),
                model: model.to_string(),
                messages: messages.to_vec(),
            });
            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(model)
                .and_then(|queue| queue.pop_front());
            match next {
                Some(Ok(text)) => Ok(CompletionResponse {
                    text,
                    model: Some(model.to_string()),
                }),
                Some(Err(e)) => Err(e),
                // Unscripted models answer something harmless.
                None => Ok(CompletionResponse {
                    text: "ok".to_string(),
                    model: Some(model.to_string()),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        assert_eq!(Provider::from("openai".to_string()), Provider::OpenAi);
        assert_eq!(
            Provider::from("groq".to_string()),
            Provider::Custom("groq".to_string())
        );
        assert_eq!(String::from(Provider::Anthropic), "anthropic");
    }
}
