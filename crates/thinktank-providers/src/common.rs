//! Shared HTTP plumbing for provider clients.

use thinktank_core::{ErrorCategory, FinishReason, ProviderError};

/// Map an HTTP status code to an [`ErrorCategory`], the way each
/// provider's own docs describe it. Falls back to
/// [`thinktank_core::error::classify_generic`] on the response body
/// when the status code alone isn't decisive.
pub fn category_for_status(status: reqwest::StatusCode, body: &str) -> ErrorCategory {
    match status.as_u16() {
        401 | 403 => ErrorCategory::Auth,
        429 => ErrorCategory::RateLimit,
        400 | 422 => ErrorCategory::InvalidRequest,
        402 => ErrorCategory::InsufficientCredits,
        500..=599 => ErrorCategory::Server,
        _ => thinktank_core::error::classify_generic(body),
    }
}

/// Build a [`ProviderError`] from a non-2xx HTTP response.
pub async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let category = category_for_status(status, &body);
    ProviderError::new(category, format!("HTTP {status}: {body}"))
}

/// Map a transport-level (connection, DNS, timeout) `reqwest::Error`
/// into a [`ProviderError`].
pub fn error_from_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::new(ErrorCategory::Network, format!("request timed out: {err}"))
    } else if err.is_connect() {
        ProviderError::new(ErrorCategory::Network, format!("connection failed: {err}"))
    } else {
        ProviderError::from_message(err.to_string())
    }
}

/// Pull an f64/i64/bool/string parameter out of a [`thinktank_core::GenerationParams`]
/// map, falling back to `default` when absent or of the wrong shape.
pub fn param_f64(params: &thinktank_core::GenerationParams, key: &str, default: f64) -> f64 {
    params.get(key).and_then(serde_json::Value::as_f64).unwrap_or(default)
}

pub fn param_u32(params: &thinktank_core::GenerationParams, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

/// Map an OpenAI-compatible `choices[0].finish_reason` string to a
/// [`FinishReason`]. Shared by the OpenAI and OpenRouter clients, which
/// speak the same wire shape.
pub fn finish_reason_from_openai_style(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("content_filter") => FinishReason::ContentFilter,
        Some("length") => FinishReason::Length,
        Some("stop") => FinishReason::Stop,
        Some(_) | None => FinishReason::Other,
    }
}
