//! `registry.*` actions against `HKEY_LOCAL_MACHINE`, driven through `reg.exe`.

use std::sync::{Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{command, decode, require_windows, scalar_text, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ROOT: &str = r"HKLM\";

pub fn register(actions: &mut ActionRegistry) {
    actions.register("registry.set", |_: &ExecContext, value: &Value| {
        Ok(Box::new(RegistrySet {
            config: decode("registry.set", value)?,
        }) as Box<dyn Action>)
    });
    actions.register("registry.get", |_: &ExecContext, value: &Value| {
        Ok(Box::new(RegistryGet {
            config: decode("registry.get", value)?,
            result: Mutex::new(None),
        }) as Box<dyn Action>)
    });
    actions.register("registry.delete", |_: &ExecContext, value: &Value| {
        Ok(Box::new(RegistryDelete {
            config: decode("registry.delete", value)?,
        }) as Box<dyn Action>)
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Dword,
    MultiString,
    Binary,
}

impl ValueType {
    fn reg_name(self) -> &'static str {
        match self {
            ValueType::String => "REG_SZ",
            ValueType::Dword => "REG_DWORD",
            ValueType::MultiString => "REG_MULTI_SZ",
            ValueType::Binary => "REG_BINARY",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Key path below HKLM, e.g. `SOFTWARE\Provision`.
    pub path: String,
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: ValueType,
}

impl RegistryConfig {
    fn require_key(&self, action: &str) -> Result<(), ActionError> {
        if self.path.is_empty() || self.name.is_empty() {
            return Err(ActionError::invalid(action, "path and name are required"));
        }
        Ok(())
    }

    fn key(&self) -> String {
        format!("{ROOT}{}", self.path.trim_start_matches('\\'))
    }

    /// The `/d` argument for `reg add`.
    fn data(&self) -> Result<String, ActionError> {
        const ACTION: &str = "registry.set";
        match self.kind {
            ValueType::String => scalar_text(&self.value)
                .ok_or_else(|| ActionError::invalid(ACTION, "string value must be a scalar")),
            ValueType::Dword => match &self.value {
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .map(|v| v.to_string())
                    .ok_or_else(|| ActionError::invalid(ACTION, format!("dword value out of range: {n}"))),
                other => Err(ActionError::invalid(
                    ACTION,
                    format!("dword value must be numeric, got {other:?}"),
                )),
            },
            ValueType::MultiString => match &self.value {
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| {
                        scalar_text(item)
                            .ok_or_else(|| ActionError::invalid(ACTION, "multi_string items must be scalars"))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(|items| items.join(r"\0")),
                _ => Err(ActionError::invalid(ACTION, "multi_string value must be a list")),
            },
            ValueType::Binary => match &self.value {
                Value::String(s) => Ok(s.bytes().map(|b| format!("{b:02x}")).collect()),
                _ => Err(ActionError::invalid(ACTION, "binary value must be a string")),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// registry.set
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RegistrySet {
    pub config: RegistryConfig,
}

impl RegistrySet {
    fn args(&self) -> Result<Vec<String>, ActionError> {
        Ok(vec![
            "add".to_string(),
            self.config.key(),
            "/v".to_string(),
            self.config.name.clone(),
            "/t".to_string(),
            self.config.kind.reg_name().to_string(),
            "/d".to_string(),
            self.config.data()?,
            "/f".to_string(),
        ])
    }
}

#[async_trait]
impl Action for RegistrySet {
    fn validate(&self) -> Result<(), ActionError> {
        self.config.require_key("registry.set")?;
        self.config.data().map(|_| ())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        require_windows("registry.set")?;
        info!(key = %self.config.key(), name = %self.config.name, kind = ?self.config.kind, "registry.set");
        command::run(ctx, "registry.set", "reg.exe", &self.args()?).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// registry.get
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RegistryGet {
    pub config: RegistryConfig,
    result: Mutex<Option<String>>,
}

impl RegistryGet {
    /// The value read by the last successful run.
    pub fn result(&self) -> Option<String> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

static QUERY_LINE_RE: OnceLock<Regex> = OnceLock::new();

fn query_line_re() -> &'static Regex {
    QUERY_LINE_RE.get_or_init(|| Regex::new(r"^\s+(.+?)\s+(REG_[A-Z_]+)(?:\s+(.*))?$").unwrap())
}

/// Extract the data for `name` from `reg query` output.
pub fn parse_query(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let caps = query_line_re().captures(line.trim_end())?;
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        Some(caps.get(3).map_or(String::new(), |m| m.as_str().to_string()))
    })
}

#[async_trait]
impl Action for RegistryGet {
    fn validate(&self) -> Result<(), ActionError> {
        self.config.require_key("registry.get")
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        require_windows("registry.get")?;
        let args = [
            "query".to_string(),
            self.config.key(),
            "/v".to_string(),
            self.config.name.clone(),
        ];
        let out = command::run(ctx, "registry.get", "reg.exe", &args).await?;
        let value = parse_query(&out.stdout, &self.config.name).ok_or_else(|| {
            ActionError::failed(
                "registry.get",
                format!("value {} not found under {}", self.config.name, self.config.key()),
            )
        })?;
        info!(name = %self.config.name, value = %value, "registry.get");
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// registry.delete
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RegistryDelete {
    pub config: RegistryConfig,
}

#[async_trait]
impl Action for RegistryDelete {
    fn validate(&self) -> Result<(), ActionError> {
        self.config.require_key("registry.delete")
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        require_windows("registry.delete")?;
        info!(key = %self.config.key(), name = %self.config.name, "registry.delete");
        let args = [
            "delete".to_string(),
            self.config.key(),
            "/v".to_string(),
            self.config.name.clone(),
            "/f".to_string(),
        ];
        command::run(ctx, "registry.delete", "reg.exe", &args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(src: &str) -> RegistryConfig {
        decode("registry.set", &serde_yaml::from_str(src).unwrap()).unwrap()
    }

    fn set(src: &str) -> RegistrySet {
        RegistrySet { config: config(src) }
    }

    #[test]
    fn string_is_the_default_type() {
        let action = set(r"{path: 'SOFTWARE\Provision', name: Owner, value: ops}");
        action.validate().unwrap();
        assert_eq!(
            action.args().unwrap(),
            [
                "add",
                r"HKLM\SOFTWARE\Provision",
                "/v",
                "Owner",
                "/t",
                "REG_SZ",
                "/d",
                "ops",
                "/f"
            ]
        );
    }

    #[test]
    fn path_and_name_are_required() {
        assert!(set("{name: x, value: 1}").validate().is_err());
        assert!(set("{path: SOFTWARE, value: 1}").validate().is_err());
        let get = RegistryGet {
            config: config("{path: SOFTWARE}"),
            result: Mutex::new(None),
        };
        assert!(get.validate().is_err());
    }

    #[test]
    fn dword_must_be_numeric_and_in_range() {
        assert!(set("{path: S, name: n, type: dword, value: 1}").validate().is_ok());
        assert!(set("{path: S, name: n, type: dword, value: one}").validate().is_err());
        assert!(set("{path: S, name: n, type: dword, value: -1}").validate().is_err());
        assert!(set("{path: S, name: n, type: dword, value: 4294967296}").validate().is_err());
    }

    #[test]
    fn multi_string_requires_list() {
        let ok = set("{path: S, name: n, type: multi_string, value: [a, b]}");
        assert_eq!(ok.config.data().unwrap(), r"a\0b");
        assert!(set("{path: S, name: n, type: multi_string, value: a}").validate().is_err());
    }

    #[test]
    fn binary_is_hex_encoded() {
        let action = set("{path: S, name: n, type: binary, value: AB}");
        assert_eq!(action.config.data().unwrap(), "4142");
    }

    #[test]
    fn unknown_type_is_a_config_error() {
        let value: Value = serde_yaml::from_str("{path: S, name: n, type: qword}").unwrap();
        assert!(decode::<RegistryConfig>("registry.set", &value).is_err());
    }

    #[test]
    fn parses_reg_query_output() {
        let out = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Provision\r\n    Owner    REG_SZ    ops team\r\n\r\n";
        assert_eq!(parse_query(out, "owner").as_deref(), Some("ops team"));
        assert_eq!(parse_query(out, "missing"), None);
        let empty = "HKEY_LOCAL_MACHINE\\S\n    Blank    REG_SZ\n";
        assert_eq!(parse_query(empty, "Blank").as_deref(), Some(""));
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn unsupported_off_windows() {
        let get = RegistryGet {
            config: config("{path: S, name: n}"),
            result: Mutex::new(None),
        };
        let err = get.run(&ExecContext::default()).await.unwrap_err();
        assert!(matches!(err, ActionError::Unsupported { .. }));
        assert_eq!(get.result(), None);
    }
}
