//! OpenRouter provider client: an OpenAI-compatible `/chat/completions`
//! endpoint fronting many third-party models.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thinktank_core::{GenerationRequest, GenerationResponse, LLMClient, ProviderError, ProviderResult, TokenUsage};

use crate::common::{error_from_response, error_from_transport, finish_reason_from_openai_style, param_f64, param_u32};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(180))
                .build()
                .expect("reqwest client builder should not fail with this configuration"),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "max_tokens")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[async_trait]
impl LLMClient for OpenRouterClient {
    fn provider_name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<GenerationResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatCompletionRequest {
            model: request.provider_model_id,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            temperature: request.params.contains_key("temperature").then(|| param_f64(&request.params, "temperature", 0.7)),
            max_tokens: request
                .params
                .contains_key("max_tokens")
                .then(|| param_u32(&request.params, "max_tokens", 2048)),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/your-org/thinktank")
            .header("X-Title", "thinktank")
            .json(&body)
            .send()
            .await
            .map_err(|e| error_from_transport(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_message(format!("failed to parse OpenRouter response: {e}")))?;

        let finish_reason = finish_reason_from_openai_style(
            parsed.choices.first().and_then(|c| c.finish_reason.as_deref()),
        );

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(GenerationResponse { text, usage, finish_reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_default_base_url_when_none_given() {
        let client = OpenRouterClient::new("key", None);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
