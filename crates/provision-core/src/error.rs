use thiserror::Error;

use crate::actions::ActionError;
use crate::cancel::Cancelled;
use crate::fetch::FetchError;
use crate::policy::PolicyError;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to load {origin}: {source}")]
    Fetch {
        origin: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("circular dependency: {origin} was already loaded")]
    CircularInclude { origin: String },

    #[error("cannot resolve include '{target}' relative to {base}: {reason}")]
    PathResolution {
        base: String,
        target: String,
        reason: String,
    },

    #[error("task {index}: unknown action: {action}")]
    UnknownAction { index: usize, action: String },

    #[error("task {index}: invalid run options for {action}: {message}")]
    RunOptions {
        index: usize,
        action: String,
        message: String,
    },

    #[error("task {index}: cannot configure {action}: {source}")]
    ActionConfig {
        index: usize,
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("task {index}: {action} failed validation: {source}")]
    Validation {
        index: usize,
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("task {index}: {action} failed after {attempts} attempt(s): {source}")]
    Execution {
        index: usize,
        action: String,
        attempts: u32,
        #[source]
        source: ActionError,
    },

    #[error("task {index}: policy check failed: {source}")]
    Policy {
        index: usize,
        #[source]
        source: PolicyError,
    },

    #[error("invalid stage id '{0}': must be alphanumeric with '.', '_' or '-'")]
    InvalidStageId(String),

    #[error("validation failed with {0} errors")]
    ValidationFailed(usize),

    #[error("run aborted: {0}")]
    Cancelled(Cancelled),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// True when the run stopped because its context ended, not because a
    /// task or document was at fault.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ProvisionError::Cancelled(_) => true,
            ProvisionError::Fetch { source, .. } => source.is_cancelled(),
            ProvisionError::Execution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
