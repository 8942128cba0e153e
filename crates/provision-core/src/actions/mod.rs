//! The action contract and the registry that maps action names to factories.
//!
//! An action is built from its entry's configuration value, validated, then
//! run (possibly several times under a retry budget). Factories are
//! registered explicitly when a registry is assembled; a duplicate name is a
//! programming error and panics.

pub mod bitlocker;
pub mod command;
pub mod domain;
pub mod file;
pub mod package;
pub mod power;
pub mod registry;
pub mod stage;
pub mod storage;
pub mod task;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::cancel::Cancelled;
use crate::context::ExecContext;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action}: invalid configuration: {message}")]
    Config { action: String, message: String },

    #[error("{action}: {message}")]
    Invalid { action: String, message: String },

    #[error("{action}: {context}: {source}")]
    Io {
        action: String,
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action}: {message}")]
    Failed { action: String, message: String },

    #[error("{action}: not supported on {platform}")]
    Unsupported {
        action: String,
        platform: &'static str,
    },

    #[error("{action}: {cause}")]
    Cancelled { action: String, cause: Cancelled },
}

impl ActionError {
    pub fn config(action: &str, message: impl Into<String>) -> Self {
        ActionError::Config {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(action: &str, message: impl Into<String>) -> Self {
        ActionError::Invalid {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn failed(action: &str, message: impl Into<String>) -> Self {
        ActionError::Failed {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn io(action: &str, context: impl Into<String>, source: std::io::Error) -> Self {
        ActionError::Io {
            action: action.to_string(),
            context: context.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled { .. })
    }
}

/// A configured unit of work.
#[async_trait]
pub trait Action: Send + Sync {
    /// Reject bad configuration before anything runs. Must not touch the host.
    fn validate(&self) -> Result<(), ActionError>;

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type ActionFactory =
    Box<dyn Fn(&ExecContext, &Value) -> Result<Box<dyn Action>, ActionError> + Send + Sync>;

#[derive(Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in action family.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Add a factory under `name`.
    ///
    /// # Panics
    /// If `name` is already registered.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ExecContext, &Value) -> Result<Box<dyn Action>, ActionError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            panic!("action '{name}' is already registered");
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<&ActionFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Register every built-in family.
pub fn register_builtins(actions: &mut ActionRegistry) {
    file::register(actions);
    stage::register(actions);
    power::register(actions);
    package::register(actions);
    registry::register(actions);
    task::register(actions);
    domain::register(actions);
    bitlocker::register(actions);
    storage::register(actions);
}

// ---------------------------------------------------------------------------
// Config decoding helpers
// ---------------------------------------------------------------------------

/// Decode a structured config. `null` decodes as an empty mapping so that
/// all-default configs can be written as a bare key.
pub(crate) fn decode<T: DeserializeOwned>(action: &str, value: &Value) -> Result<T, ActionError> {
    let value = match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other.clone(),
    };
    serde_yaml::from_value(value).map_err(|e| ActionError::config(action, e.to_string()))
}

/// Decode a config that may also be written as a single scalar, which fills
/// the `field` key (`- file.mkdir: /tmp/x` ≡ `- file.mkdir: {path: /tmp/x}`).
pub(crate) fn decode_shorthand<T: DeserializeOwned>(
    action: &str,
    field: &str,
    value: &Value,
) -> Result<T, ActionError> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            let mut mapping = Mapping::new();
            mapping.insert(Value::from(field), value.clone());
            decode(action, &Value::Mapping(mapping))
        }
        other => decode(action, other),
    }
}

/// Reject a run on platforms other than Windows.
pub(crate) fn require_windows(action: &str) -> Result<(), ActionError> {
    if cfg!(windows) {
        Ok(())
    } else {
        Err(ActionError::Unsupported {
            action: action.to_string(),
            platform: std::env::consts::OS,
        })
    }
}

/// Render a YAML scalar as text. Integers and booleans are accepted where a
/// string is expected (`stage.set: 10`).
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
