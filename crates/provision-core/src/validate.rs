//! Dry-run checking of a task list.
//!
//! Every entry is taken through the same preparation the runner performs
//! (options, lookup, construction, `validate`) without running anything.
//! Gate entries have their policies constructed but not evaluated, so a
//! report does not depend on the host it was produced on. Defects are
//! collected rather than stopping at the first.

use serde::Serialize;
use tracing::{debug, error};

use crate::actions::ActionRegistry;
use crate::context::ExecContext;
use crate::document::TaskEntry;
use crate::error::ProvisionError;
use crate::policy;
use crate::runner::prepare;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownAction,
    RunOptions,
    Config,
    Validation,
    Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// 1-based position in the flattened task list.
    pub index: usize,
    pub key: String,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// `Err(ValidationFailed(n))` when any issue was found.
    pub fn into_result(self) -> crate::error::Result<ValidationReport> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ProvisionError::ValidationFailed(self.issues.len()))
        }
    }
}

fn issue_kind(err: &ProvisionError) -> IssueKind {
    match err {
        ProvisionError::UnknownAction { .. } => IssueKind::UnknownAction,
        ProvisionError::RunOptions { .. } => IssueKind::RunOptions,
        ProvisionError::ActionConfig { .. } => IssueKind::Config,
        ProvisionError::Policy { .. } => IssueKind::Policy,
        _ => IssueKind::Validation,
    }
}

/// Check every entry of `tasks` without side effects.
pub fn validate(tasks: &[TaskEntry], registry: &ActionRegistry, ctx: &ExecContext) -> ValidationReport {
    let mut report = ValidationReport {
        checked: tasks.len(),
        issues: Vec::new(),
    };
    for (i, entry) in tasks.iter().enumerate() {
        let index = i + 1;
        let outcome = if entry.is_gate() {
            policy::parse_gate(entry.value())
                .map(|_| ())
                .map_err(|source| ProvisionError::Policy { index, source })
        } else {
            prepare(registry, ctx, index, entry).map(|_| ())
        };
        match outcome {
            Ok(()) => debug!(index, key = entry.key(), "entry ok"),
            Err(e) => {
                error!(index, key = entry.key(), error = %e, "validation error");
                report.issues.push(ValidationIssue {
                    index,
                    key: entry.key().to_string(),
                    kind: issue_kind(&e),
                    message: e.to_string(),
                });
            }
        }
    }
    report
}
