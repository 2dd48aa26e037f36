//! Model processor (C3)
//!
//! Drives a single model call end to end: resolve the model against
//! the registry, acquire rate-limit admission, call the client,
//! persist the result. One function handles both a fan-out model
//! (Phase A, `PersistTarget::PerModel`) and the synthesis model
//! (Phase C, `PersistTarget::Synthesis`), since the two differ only in
//! what gets written and logged.
//!
//! Registry resolution happens *inside* this per-model flow rather
//! than before it, so a model that fails to resolve or whose client
//! fails to construct (e.g. a missing API-key env var) produces a
//! `ModelOutcome::Failure` for that model alone: it never aborts the
//! whole run, and its siblings still get a chance to run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditEvent, AuditSink};
use crate::client::GenerationRequest;
use crate::context::{RunContext, StopReason};
use crate::error::{ErrorCategory, RegistryError};
use crate::output::OutputWriter;
use crate::ratelimit::{AcquireOutcome, RateLimiter};
use crate::registry::Registry;

/// Where a processed model's output should be written, and what audit
/// events to emit around it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistTarget {
    PerModel,
    Synthesis,
}

/// The terminal state of one model's processing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ModelOutcome {
    Success {
        model: String,
        output_path: String,
        duration_ms: u64,
    },
    Failure {
        model: String,
        category: ErrorCategory,
        message: String,
        duration_ms: u64,
    },
}

impl ModelOutcome {
    pub fn model(&self) -> &str {
        match self {
            ModelOutcome::Success { model, .. } | ModelOutcome::Failure { model, .. } => model,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModelOutcome::Success { .. })
    }
}

/// Inputs for a single processing run, independent of whether it's a
/// fan-out model or the synthesis model. Carries only a raw alias and
/// the already-assembled prompt text; everything provider-specific
/// (client, provider_model_id, parameters) is resolved against the
/// registry inside [`process`].
pub struct ProcessRequest {
    pub model_alias: String,
    pub prompt: String,
    pub target: PersistTarget,
    /// Number of contributing inputs, reported on `SynthesisStarted`.
    /// Unused for `PersistTarget::PerModel`.
    pub input_count: usize,
}

/// Categorize a registry-resolution failure. A missing API key is an
/// auth problem from the operator's point of view; everything else
/// (unknown alias, dangling provider reference, no factory registered)
/// is a configuration problem.
fn categorize_registry_error(err: &RegistryError) -> ErrorCategory {
    match err {
        RegistryError::MissingApiKey { .. } => ErrorCategory::Auth,
        _ => ErrorCategory::Config,
    }
}

/// Resolve, acquire admission, call the client, persist, and emit
/// audit events. Never panics on a provider or resolution failure;
/// every error path returns a `ModelOutcome::Failure` instead.
pub async fn process(
    ctx: &RunContext,
    req: ProcessRequest,
    registry: &Registry,
    limiter: &RateLimiter,
    writer: &OutputWriter,
    audit: &Arc<dyn AuditSink>,
) -> ModelOutcome {
    let start = std::time::Instant::now();
    let model = req.model_alias.clone();

    emit_started(audit, ctx, req.target, &model, req.input_count).await;

    let outcome = run(ctx, &req, registry, limiter, writer, audit).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let outcome = match outcome {
        Ok(path) => ModelOutcome::Success {
            model: model.clone(),
            output_path: path,
            duration_ms,
        },
        Err((category, message)) => ModelOutcome::Failure {
            model: model.clone(),
            category,
            message: crate::error::redact(&message),
            duration_ms,
        },
    };

    emit_finished(audit, ctx, req.target, &outcome).await;
    outcome
}

async fn run(
    ctx: &RunContext,
    req: &ProcessRequest,
    registry: &Registry,
    limiter: &RateLimiter,
    writer: &OutputWriter,
    audit: &Arc<dyn AuditSink>,
) -> Result<String, (ErrorCategory, String)> {
    let model = registry
        .resolve(&req.model_alias)
        .map_err(|e| (categorize_registry_error(&e), e.to_string()))?;

    let params = match registry.default_parameters(&req.model_alias) {
        Ok(params) => params,
        Err(e) => {
            audit
                .log(AuditEntry::new(
                    ctx.correlation_id().clone(),
                    AuditEvent::ParameterResolutionDegraded {
                        model: req.model_alias.clone(),
                        message: e.to_string(),
                    },
                ))
                .await;
            Default::default()
        }
    };

    let client = registry
        .create_client(&req.model_alias)
        .map_err(|e| (categorize_registry_error(&e), e.to_string()))?;

    let generation_request = GenerationRequest {
        provider_model_id: model.provider_model_id.clone(),
        prompt: req.prompt.clone(),
        params,
    };
    let rpm = model.rpm;

    match limiter.acquire(ctx, &req.model_alias, rpm).await {
        AcquireOutcome::Cancelled => {
            Err((ErrorCategory::Cancelled, "cancelled while waiting for rate-limit admission".to_string()))
        }
        AcquireOutcome::DeadlineExceeded => Err((
            ErrorCategory::Cancelled,
            "deadline exceeded while waiting for rate-limit admission".to_string(),
        )),
        AcquireOutcome::Granted(_permit) => {
            let response = match ctx.race(client.generate(generation_request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(provider_err)) => {
                    return Err((provider_err.category, provider_err.message));
                }
                Err(StopReason::Cancelled) => {
                    return Err((ErrorCategory::Cancelled, "cancelled while awaiting the provider".to_string()))
                }
                Err(StopReason::DeadlineExceeded) => {
                    return Err((
                        ErrorCategory::Cancelled,
                        "deadline exceeded while awaiting the provider".to_string(),
                    ))
                }
            };

            if response.finish_reason == crate::client::FinishReason::ContentFilter {
                return Err((ErrorCategory::ContentFiltered, "response was blocked by the provider's safety filters".to_string()));
            }

            if response.text.trim().is_empty() {
                return Err((ErrorCategory::EmptyResponse, "model returned an empty response".to_string()));
            }

            let write_result = match req.target {
                PersistTarget::PerModel => writer.write_per_model(ctx, &req.model_alias, &response.text),
                PersistTarget::Synthesis => writer.write_synthesis(ctx, &req.model_alias, &response.text),
            };

            write_result
                .map(|path| path.display().to_string())
                .map_err(|e| (ErrorCategory::OutputWrite, e.to_string()))
        }
    }
}

async fn emit_started(audit: &Arc<dyn AuditSink>, ctx: &RunContext, target: PersistTarget, model: &str, input_count: usize) {
    let event = match target {
        PersistTarget::PerModel => AuditEvent::ModelStarted {
            model: model.to_string(),
        },
        PersistTarget::Synthesis => AuditEvent::SynthesisStarted {
            model: model.to_string(),
            input_count,
        },
    };
    audit.log(AuditEntry::new(ctx.correlation_id().clone(), event)).await;
}

async fn emit_finished(audit: &Arc<dyn AuditSink>, ctx: &RunContext, target: PersistTarget, outcome: &ModelOutcome) {
    let event = match (target, outcome) {
        (
            PersistTarget::PerModel,
            ModelOutcome::Success {
                model,
                output_path,
                duration_ms,
            },
        ) => AuditEvent::ModelSucceeded {
            model: model.clone(),
            output_path: output_path.clone(),
            duration_ms: *duration_ms,
        },
        (
            PersistTarget::PerModel,
            ModelOutcome::Failure {
                model,
                category,
                message,
                duration_ms,
            },
        ) => AuditEvent::ModelFailed {
            model: model.clone(),
            category: *category,
            message: message.clone(),
            duration_ms: *duration_ms,
        },
        (
            PersistTarget::Synthesis,
            ModelOutcome::Success {
                model,
                output_path,
                duration_ms,
            },
        ) => AuditEvent::SynthesisSucceeded {
            model: model.clone(),
            output_path: output_path.clone(),
            duration_ms: *duration_ms,
        },
        (
            PersistTarget::Synthesis,
            ModelOutcome::Failure {
                model,
                category,
                message,
                duration_ms,
            },
        ) => AuditEvent::SynthesisFailed {
            model: model.clone(),
            category: *category,
            message: message.clone(),
            duration_ms: *duration_ms,
        },
    };
    audit.log(AuditEntry::new(ctx.correlation_id().clone(), event)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAuditSink;
    use crate::client::mock::{MockBehavior, MockClient, MockFactory};
    use crate::registry::{ModelDefinition, ParameterKind, ParameterSpec, ProviderDefinition, RegistryFile};
    use tempfile::tempdir;

    fn registry_with(alias: &str, behavior: MockBehavior) -> Registry {
        let file = RegistryFile {
            providers: vec![ProviderDefinition {
                key: "mock".to_string(),
                base_url: None,
                default_rpm: 0,
                api_key_env: "MOCK_API_KEY".to_string(),
            }],
            models: vec![ModelDefinition {
                alias: alias.to_string(),
                provider: "mock".to_string(),
                provider_model_id: alias.to_string(),
                context_window: None,
                max_output_tokens: None,
                rpm: None,
                parameters: vec![ParameterSpec {
                    name: "temperature".to_string(),
                    kind: ParameterKind::Number,
                    default: Some(serde_json::json!(0.7)),
                    min: Some(0.0),
                    max: Some(2.0),
                }],
            }],
        };
        let registry = Registry::load(&[], file).unwrap();
        registry.register_factory(Arc::new(MockFactory::new("mock", Arc::new(MockClient::new(alias, behavior)))));
        registry
    }

    fn req(model: &str, target: PersistTarget) -> ProcessRequest {
        ProcessRequest {
            model_alias: model.to_string(),
            prompt: "hello".to_string(),
            target,
            input_count: 1,
        }
    }

    #[tokio::test]
    async fn successful_call_writes_output_and_returns_success() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("m1", MockBehavior::Succeed("answer".to_string()));

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn provider_failure_is_classified_and_redacted() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with(
            "m1",
            MockBehavior::Fail(ErrorCategory::Auth, "invalid api key sk-abcdefghijklmnop".to_string()),
        );

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, message, .. } => {
                assert_eq!(category, ErrorCategory::Auth);
                assert!(!message.contains("abcdefghijklmnop"));
            }
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn empty_response_is_a_failure() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("m1", MockBehavior::Succeed(String::new()));

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, .. } => assert_eq!(category, ErrorCategory::EmptyResponse),
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn blocked_content_is_classified_before_empty_response_check() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("m1", MockBehavior::Blocked);

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, .. } => assert_eq!(category, ErrorCategory::ContentFiltered),
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn cancelled_context_yields_cancelled_category() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("m1", MockBehavior::Hang);

        let ctx = RunContext::detached();
        ctx.cancel();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, .. } => assert_eq!(category, ErrorCategory::Cancelled),
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn synthesis_target_writes_model_derived_filename() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("synth", MockBehavior::Succeed("combined".to_string()));

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("synth", PersistTarget::Synthesis), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Success { output_path, .. } => assert!(output_path.ends_with("synth-synthesis.md")),
            ModelOutcome::Failure { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn unknown_model_alias_fails_without_touching_the_client() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        let registry = registry_with("m1", MockBehavior::Succeed("unused".to_string()));

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("does-not-exist", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, .. } => assert_eq!(category, ErrorCategory::Config),
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn missing_api_key_is_categorized_as_auth() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, None);
        let limiter = RateLimiter::new(0, 0);
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);

        // A registry with no factory registered for "mock" surfaces as
        // ProviderUnavailable (Config), not MissingApiKey -- that case is
        // exercised at the `thinktank-providers` factory level instead.
        let file = RegistryFile {
            providers: vec![ProviderDefinition {
                key: "mock".to_string(),
                base_url: None,
                default_rpm: 0,
                api_key_env: "MOCK_API_KEY".to_string(),
            }],
            models: vec![ModelDefinition {
                alias: "m1".to_string(),
                provider: "mock".to_string(),
                provider_model_id: "m1".to_string(),
                context_window: None,
                max_output_tokens: None,
                rpm: None,
                parameters: vec![],
            }],
        };
        let registry = Registry::load(&[], file).unwrap();

        let ctx = RunContext::detached();
        let outcome = process(&ctx, req("m1", PersistTarget::PerModel), &registry, &limiter, &writer, &audit).await;
        match outcome {
            ModelOutcome::Failure { category, .. } => assert_eq!(category, ErrorCategory::Config),
            ModelOutcome::Success { .. } => panic!("expected failure"),
        }
    }
}
