//! Concrete [`thinktank_core::LLMClient`] implementations and the
//! [`thinktank_core::ClientFactory`] glue that lets `thinktank-cli`
//! register them into a [`thinktank_core::Registry`] without
//! `thinktank-core` itself depending on any HTTP client.

pub mod common;
pub mod gemini;
pub mod openai;
pub mod openrouter;

use std::sync::Arc;

use thinktank_core::{ClientFactory, LLMClient, ModelDefinition, ProviderDefinition, RegistryError, Result};

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use openrouter::OpenRouterClient;

/// Builds [`GeminiClient`]s, reading the API key from the provider's
/// configured `api_key_env` variable (`GEMINI_API_KEY` by default).
pub struct GeminiFactory;

impl ClientFactory for GeminiFactory {
    fn provider_key(&self) -> &str {
        "gemini"
    }

    fn build(&self, _model: &ModelDefinition, provider: &ProviderDefinition) -> Result<Arc<dyn LLMClient>> {
        let api_key = std::env::var(&provider.api_key_env).map_err(|_| RegistryError::MissingApiKey {
            provider: provider.key.clone(),
            env_var: provider.api_key_env.clone(),
        })?;
        Ok(Arc::new(GeminiClient::new(api_key, provider.base_url.clone())))
    }
}

/// Builds [`OpenAiClient`]s, reading the API key from the provider's
/// configured `api_key_env` variable (`OPENAI_API_KEY` by default).
pub struct OpenAiFactory;

impl ClientFactory for OpenAiFactory {
    fn provider_key(&self) -> &str {
        "openai"
    }

    fn build(&self, _model: &ModelDefinition, provider: &ProviderDefinition) -> Result<Arc<dyn LLMClient>> {
        let api_key = std::env::var(&provider.api_key_env).map_err(|_| RegistryError::MissingApiKey {
            provider: provider.key.clone(),
            env_var: provider.api_key_env.clone(),
        })?;
        Ok(Arc::new(OpenAiClient::new(api_key, provider.base_url.clone())))
    }
}

/// Builds [`OpenRouterClient`]s, reading the API key from the
/// provider's configured `api_key_env` variable (`OPENROUTER_API_KEY`
/// by default).
pub struct OpenRouterFactory;

impl ClientFactory for OpenRouterFactory {
    fn provider_key(&self) -> &str {
        "openrouter"
    }

    fn build(&self, _model: &ModelDefinition, provider: &ProviderDefinition) -> Result<Arc<dyn LLMClient>> {
        let api_key = std::env::var(&provider.api_key_env).map_err(|_| RegistryError::MissingApiKey {
            provider: provider.key.clone(),
            env_var: provider.api_key_env.clone(),
        })?;
        Ok(Arc::new(OpenRouterClient::new(api_key, provider.base_url.clone())))
    }
}

/// Register every built-in provider factory into `registry`. Called
/// once at CLI startup.
pub fn register_builtin_factories(registry: &thinktank_core::Registry) {
    registry.register_factory(Arc::new(GeminiFactory));
    registry.register_factory(Arc::new(OpenAiFactory));
    registry.register_factory(Arc::new(OpenRouterFactory));
}
