//! Google Gemini provider client (`generateContent` REST API).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thinktank_core::{FinishReason, GenerationRequest, GenerationResponse, LLMClient, ProviderError, ProviderResult, TokenUsage};

use crate::common::{error_from_response, error_from_transport, param_f64, param_u32};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client builder should not fail with this configuration"),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[async_trait]
impl LLMClient for GeminiClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<GenerationResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.provider_model_id, self.api_key
        );

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: request.prompt }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: request.params.contains_key("temperature").then(|| param_f64(&request.params, "temperature", 0.7)),
                top_p: request.params.contains_key("top_p").then(|| param_f64(&request.params, "top_p", 1.0)),
                max_output_tokens: request
                    .params
                    .contains_key("max_output_tokens")
                    .then(|| param_u32(&request.params, "max_output_tokens", 2048)),
            }),
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_from_transport(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_message(format!("failed to parse Gemini response: {e}")))?;

        let blocked_by_prompt_feedback = parsed
            .prompt_feedback
            .as_ref()
            .is_some_and(|f| f.block_reason.is_some());
        let candidate_finish_reason = parsed.candidates.first().and_then(|c| c.finish_reason.as_deref());
        let blocked_by_candidate = matches!(candidate_finish_reason, Some("SAFETY") | Some("RECITATION"));

        let finish_reason = if blocked_by_prompt_feedback || blocked_by_candidate {
            FinishReason::ContentFilter
        } else {
            FinishReason::Stop
        };

        let text = parsed
            .candidates
            .into_iter()
            .find_map(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
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
        let client = GeminiClient::new("key", None);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn client_respects_custom_base_url() {
        let client = GeminiClient::new("key", Some("https://example.test/v1".to_string()));
        assert_eq!(client.base_url, "https://example.test/v1");
    }

    #[test]
    fn prompt_feedback_block_reason_is_detected() {
        let raw = r#"{"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.prompt_feedback.unwrap().block_reason.is_some());
    }

    #[test]
    fn candidate_finish_reason_safety_is_detected() {
        let raw = r#"{"candidates": [{"content": null, "finishReason": "SAFETY"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("SAFETY"));
    }
}
