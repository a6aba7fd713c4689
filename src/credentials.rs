//! Credential capability.
//!
//! Storage and decryption of per-provider secrets is the surrounding
//! system's job; the core only asks for a usable secret. The env-backed
//! default lets a single-tenant deployment run without a secrets service.

use async_trait::async_trait;

use crate::llm::Provider;

/// Resolves a provider credential for a user.
#[async_trait]
pub trait Credentials: Send + Sync {
    /// Fetch the secret for `(owner, provider)`. `None` means no credential
    /// is configured, which the invoker treats as a critical failure.
    async fn get(&self, owner: &str, provider: &Provider) -> Option<String>;
}

/// Environment-variable backed credentials, keyed by provider only.
///
/// Looks up `<PROVIDER>_API_KEY` (e.g. `OPENAI_API_KEY`); the owner is
/// ignored.
pub struct EnvCredentials;

#[async_trait]
impl Credentials for EnvCredentials {
    async fn get(&self, _owner: &str, provider: &Provider) -> Option<String> {
        let var = format!(
            "{}_API_KEY",
            provider.as_str().to_ascii_uppercase().replace('-', "_")
        );
        std::env::var(&var).ok().filter(|v| !v.is_empty())
    }
}
