//! Translate a finished [`thinktank_core::RunReport`] into a process
//! exit code, per the category table in [`thinktank_core::ErrorCategory::exit_code`].

use thinktank_core::{RunReport, RunStatus};

pub fn exit_code_for(report: &RunReport, partial_success_tolerant: bool) -> i32 {
    match report.status {
        RunStatus::AllSucceeded => 0,
        RunStatus::PartialSuccess if partial_success_tolerant => 0,
        RunStatus::PartialSuccess | RunStatus::AllFailed => {
            report.dominant_failure_category().map_or(1, |c| c.exit_code())
        }
    }
}
