//! Configuration documents and the entries they carry.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ProvisionError, Result};

/// Reserved key marking an entry as a policy gate.
pub const GATE_KEY: &str = "policy";

/// One list item of a task list: a single key naming an action (or the gate
/// marker) and its configuration value.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    key: String,
    value: Value,
}

impl TaskEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_gate(&self) -> bool {
        self.key == GATE_KEY
    }

    fn from_mapping(mapping: Mapping) -> std::result::Result<Self, String> {
        if mapping.len() != 1 {
            return Err(format!(
                "each task must have exactly one key, found {}",
                mapping.len()
            ));
        }
        let (key, value) = mapping
            .into_iter()
            .next()
            .ok_or_else(|| "empty task entry".to_string())?;
        match key {
            Value::String(key) => Ok(Self { key, value }),
            other => Err(format!("task key must be a string, found {}", describe(&other))),
        }
    }
}

/// Ordered, include-expanded entries ready for execution.
pub type TaskList = Vec<TaskEntry>;

/// One parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    pub include: Vec<String>,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredDocument {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    tasks: Vec<Mapping>,
}

impl ConfigDocument {
    /// Parse either shape: a mapping with `include`/`tasks`, or a bare task
    /// list. An empty document yields no tasks.
    pub fn parse(origin: &str, data: &[u8]) -> Result<Self> {
        let parse_err = |message: String| ProvisionError::Parse {
            origin: origin.to_string(),
            message,
        };

        let value: Value = serde_yaml::from_slice(data).map_err(|e| parse_err(e.to_string()))?;
        if value.is_null() {
            return Ok(Self::default());
        }

        let is_mapping = value.is_mapping();
        let structured = serde_yaml::from_value::<StructuredDocument>(value.clone());
        let (include, raw_tasks) = match structured {
            Ok(doc) if !doc.include.is_empty() || !doc.tasks.is_empty() => (doc.include, doc.tasks),
            structured => match serde_yaml::from_value::<Vec<Mapping>>(value) {
                Ok(list) => (Vec::new(), list),
                Err(list_err) => match structured {
                    Ok(_) => (Vec::new(), Vec::new()),
                    Err(doc_err) => {
                        let message = if is_mapping {
                            doc_err.to_string()
                        } else {
                            list_err.to_string()
                        };
                        return Err(parse_err(format!(
                            "expected a task list or an include/tasks mapping: {message}"
                        )));
                    }
                },
            },
        };

        let tasks = raw_tasks
            .into_iter()
            .enumerate()
            .map(|(i, mapping)| {
                TaskEntry::from_mapping(mapping).map_err(|m| parse_err(format!("task {}: {m}", i + 1)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, tasks })
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<ConfigDocument> {
        ConfigDocument::parse("test.yaml", src.as_bytes())
    }

    #[test]
    fn bare_list() {
        let doc = parse("- file.mkdir: /tmp/a\n- stage.set: '2'\n").unwrap();
        assert!(doc.include.is_empty());
        let keys: Vec<_> = doc.tasks.iter().map(TaskEntry::key).collect();
        assert_eq!(keys, ["file.mkdir", "stage.set"]);
    }

    #[test]
    fn structured_with_include_and_tasks() {
        let doc = parse("include:\n  - base.yaml\ntasks:\n  - policy: [device_model]\n  - file.mkdir: /x\n").unwrap();
        assert_eq!(doc.include, ["base.yaml"]);
        assert_eq!(doc.tasks.len(), 2);
        assert!(doc.tasks[0].is_gate());
        assert!(!doc.tasks[1].is_gate());
    }

    #[test]
    fn structured_include_only() {
        let doc = parse("include: [a.yaml, b.yaml]\n").unwrap();
        assert_eq!(doc.include, ["a.yaml", "b.yaml"]);
        assert!(doc.tasks.is_empty());
    }

    #[test]
    fn empty_documents_have_no_tasks() {
        for src in ["", "\n", "# only a comment\n", "[]", "include: []\ntasks: []\n"] {
            let doc = parse(src).unwrap_or_else(|e| panic!("{src:?}: {e}"));
            assert_eq!(doc, ConfigDocument::default(), "{src:?}");
        }
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = parse("include: [a.yaml]\nsteps: []\n").unwrap_err();
        match err {
            ProvisionError::Parse { origin, message } => {
                assert_eq!(origin, "test.yaml");
                assert!(message.contains("steps"), "{message}");
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn entry_with_two_keys_is_rejected() {
        let err = parse("- file.mkdir: /a\n  stage.set: '1'\n").unwrap_err();
        assert!(err.to_string().contains("task 1"), "{err}");
        assert!(err.to_string().contains("exactly one key"), "{err}");
    }

    #[test]
    fn non_string_key_is_rejected() {
        let err = parse("- 42: /a\n").unwrap_err();
        assert!(err.to_string().contains("must be a string"), "{err}");
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(matches!(parse("just text"), Err(ProvisionError::Parse { .. })));
    }

    #[test]
    fn list_of_scalars_is_rejected() {
        assert!(matches!(parse("- a\n- b\n"), Err(ProvisionError::Parse { .. })));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        assert!(matches!(parse("- a: [unclosed\n"), Err(ProvisionError::Parse { .. })));
    }

    #[test]
    fn entry_values_are_preserved() {
        let doc = parse("- file.copy:\n    src: a\n    dst: b\n    retries: 2\n").unwrap();
        let value = doc.tasks[0].value();
        assert_eq!(value["src"], Value::from("a"));
        assert_eq!(value["retries"], Value::from(2));
    }
}
