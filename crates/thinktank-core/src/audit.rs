//! Correlation & audit trail (C7)
//!
//! An `AuditSink` receives one `AuditEntry` per lifecycle event of a
//! run (model started, model finished, synthesis finished, run
//! finished). The core ships no concrete sink; `thinktank-cli` wires a
//! file-backed one at startup and passes it down by `Arc<dyn AuditSink>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::CorrelationId;
use crate::error::ErrorCategory;

/// A single audit-worthy event in the lifetime of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistryInitialized {
        source: String,
    },
    RunStarted {
        models: Vec<String>,
        synthesis_model: Option<String>,
    },
    ModelStarted {
        model: String,
    },
    ParameterResolutionDegraded {
        model: String,
        message: String,
    },
    ModelSucceeded {
        model: String,
        output_path: String,
        duration_ms: u64,
    },
    ModelFailed {
        model: String,
        category: ErrorCategory,
        message: String,
        duration_ms: u64,
    },
    SynthesisStarted {
        model: String,
        input_count: usize,
    },
    SynthesisSucceeded {
        model: String,
        output_path: String,
        duration_ms: u64,
    },
    SynthesisFailed {
        model: String,
        category: ErrorCategory,
        message: String,
        duration_ms: u64,
    },
    RunFinished {
        status: String,
        exit_code: i32,
        duration_ms: u64,
    },
}

/// One row of the audit trail: an event stamped with the run's
/// correlation id and a wall-clock timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(correlation_id: CorrelationId, event: AuditEvent) -> Self {
        Self {
            correlation_id,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Destination for audit entries. Implementations must not block the
/// caller's async task for long; a file sink should buffer/flush
/// cheaply and never panic on a write failure (log and drop instead).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: AuditEntry);
}

/// An `AuditSink` that discards every entry. Used when no `--audit-log`
/// path is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn log(&self, _entry: AuditEntry) {}
}
