//! Core orchestration library for `thinktank`: fan a prompt out to
//! several LLM models concurrently, persist each response, and
//! optionally synthesize the results with one more model call.
//!
//! This crate owns the model registry, rate limiter, processor,
//! orchestrator, output writer, error taxonomy, and audit trail. It
//! has no knowledge of any concrete provider's wire format — that
//! lives in `thinktank-providers`, which implements [`client::LLMClient`]
//! and registers a [`registry::ClientFactory`] for each provider it
//! supports.

pub mod audit;
pub mod client;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod processor;
pub mod ratelimit;
pub mod registry;

pub use audit::{AuditEntry, AuditEvent, AuditSink, NoopAuditSink};
pub use client::{FinishReason, GenerationParams, GenerationRequest, GenerationResponse, LLMClient, ProviderError, ProviderResult};
pub use context::{CorrelationId, RunContext, StopReason};
pub use error::{ErrorCategory, RegistryError, Result};
pub use orchestrator::{Orchestrator, RunConfig, RunReport, RunStatus};
pub use output::{OutputError, OutputWriter};
pub use processor::{ModelOutcome, PersistTarget};
pub use ratelimit::{AcquireOutcome, RateLimiter};
pub use registry::{
    ClientFactory, ModelDefinition, ParameterKind, ParameterSpec, ProviderDefinition, Registry, RegistryFile, RegistrySource,
};
