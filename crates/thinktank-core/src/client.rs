//! Provider client abstraction
//!
//! `LLMClient` is the seam between `thinktank-core` and
//! `thinktank-providers`: the core only ever holds `Arc<dyn LLMClient>`
//! trait objects, handed to it by a `ClientFactory` the CLI registers
//! at startup.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// Provider-specific generation parameters (temperature, top_p,
/// max_output_tokens, ...). Kept dynamic because the set of valid
/// parameters and their types is itself registry data (`ParameterSpec`),
/// not a fixed Rust struct.
pub type GenerationParams = HashMap<String, serde_json::Value>;

/// A fully-resolved request to a single model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The provider's own identifier for the model (not the registry alias).
    pub provider_model_id: String,
    pub prompt: String,
    pub params: GenerationParams,
}

/// Token accounting returned alongside a successful completion, when
/// the provider reports it.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Why the provider stopped generating. Distinguishing `ContentFilter`
/// from a normal `Stop` is what lets `Classify` (see `processor`)
/// report a safety block as `ErrorCategory::ContentFiltered` instead of
/// a generic `EmptyResponse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
}

/// A successful model response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// The error a provider client raises. Already classified: provider
/// implementations are expected to map transport/HTTP-status detail to
/// a category themselves where they can (e.g. HTTP 401 -> `Auth`),
/// falling back to [`crate::error::classify_generic`] only when the
/// provider gives no better signal.
#[derive(Clone, Debug)]
pub struct ProviderError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Build a `ProviderError` from a raw message with no known
    /// category, running it through the generic classifier.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let category = crate::error::classify_generic(&message);
        Self { category, message }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A live connection to one LLM provider, scoped to a single call
/// shape: "generate text from a prompt, with these parameters".
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// A short identifier for logging (e.g. "gemini", "openai", "openrouter").
    fn provider_name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<GenerationResponse>;
}
