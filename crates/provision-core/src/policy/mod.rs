//! Policy gates: named checks against host facts that must pass before the
//! remaining tasks run.
//!
//! A gate entry's value is a list of specifiers, each either a bare policy
//! name (`- device_model`) or a single-key mapping from name to options
//! (`- os_version: {allowed_versions: ["11"]}`).

mod facts;

pub use facts::{
    chassis_name, windows_version_from_build, windows_version_from_caption, HostFacts,
    StaticFacts, SystemFacts,
};

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown policy: {0}")]
    Unknown(String),

    #[error("invalid options for policy {policy}: {message}")]
    InvalidOptions { policy: String, message: String },

    #[error("invalid policy specifier: {0}")]
    InvalidSpecifier(String),

    #[error("policy gate must be a list of policies")]
    NotAList,

    #[error("policy {policy}: {reason}")]
    Unmet {
        policy: &'static str,
        reason: String,
    },
}

pub trait Policy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, facts: &dyn HostFacts) -> Result<(), PolicyError>;
}

fn eq_fold(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

// ---------------------------------------------------------------------------
// os_version
// ---------------------------------------------------------------------------

/// Exact (case-insensitive) OS family and version match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsVersionPolicy {
    /// Required OS family; empty means any.
    pub os: String,
    /// Allowed versions; empty means any.
    pub allowed_versions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OsVersionOptions {
    os: Option<String>,
    version: Option<VersionText>,
    #[serde(default)]
    allowed_versions: Vec<VersionText>,
}

/// Versions are often written unquoted (`version: 11`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionText {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<VersionText> for String {
    fn from(v: VersionText) -> Self {
        match v {
            VersionText::Text(s) => s,
            VersionText::Int(n) => n.to_string(),
            VersionText::Float(f) => f.to_string(),
        }
    }
}

impl Policy for OsVersionPolicy {
    fn name(&self) -> &'static str {
        "os_version"
    }

    fn check(&self, facts: &dyn HostFacts) -> Result<(), PolicyError> {
        let family = facts.os_family();
        if !self.os.is_empty() && !eq_fold(&family, &self.os) {
            return Err(PolicyError::Unmet {
                policy: self.name(),
                reason: format!("expected OS {:?}, got {:?}", self.os, family),
            });
        }
        if self.allowed_versions.is_empty() {
            return Ok(());
        }
        let current = facts.os_version();
        if self.allowed_versions.iter().any(|v| eq_fold(v, &current)) {
            return Ok(());
        }
        Err(PolicyError::Unmet {
            policy: self.name(),
            reason: format!(
                "version {current:?} not in allowed list {:?}",
                self.allowed_versions
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// device_model
// ---------------------------------------------------------------------------

/// Case-insensitive substring match on the device model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceModelPolicy {
    pub allowed: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AllowListOptions {
    #[serde(default)]
    allowed: Vec<String>,
}

impl Policy for DeviceModelPolicy {
    fn name(&self) -> &'static str {
        "device_model"
    }

    fn check(&self, facts: &dyn HostFacts) -> Result<(), PolicyError> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        let model = facts.device_model();
        if model.is_empty() {
            return Ok(());
        }
        let lower = model.to_lowercase();
        if self.allowed.iter().any(|a| lower.contains(&a.to_lowercase())) {
            return Ok(());
        }
        Err(PolicyError::Unmet {
            policy: self.name(),
            reason: format!("model {model:?} not in allowed list {:?}", self.allowed),
        })
    }
}

// ---------------------------------------------------------------------------
// chassis_type
// ---------------------------------------------------------------------------

/// Exact (case-insensitive) chassis category match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChassisTypePolicy {
    pub allowed: Vec<String>,
}

impl Policy for ChassisTypePolicy {
    fn name(&self) -> &'static str {
        "chassis_type"
    }

    fn check(&self, facts: &dyn HostFacts) -> Result<(), PolicyError> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        let chassis = facts.chassis_type();
        if chassis.is_empty() || self.allowed.iter().any(|a| eq_fold(a, &chassis)) {
            return Ok(());
        }
        Err(PolicyError::Unmet {
            policy: self.name(),
            reason: format!("type {chassis:?} not in allowed list {:?}", self.allowed),
        })
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn options<T: DeserializeOwned + Default>(policy: &str, value: Option<&Value>) -> Result<T, PolicyError> {
    match value {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_yaml::from_value(v.clone()).map_err(|e| PolicyError::InvalidOptions {
            policy: policy.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Build a policy by name. `os_version` defaults its family to `windows`.
pub fn new_policy(name: &str, opts: Option<&Value>) -> Result<Box<dyn Policy>, PolicyError> {
    match name {
        "os_version" => {
            let o: OsVersionOptions = options(name, opts)?;
            let allowed_versions: Vec<String> = o
                .version
                .into_iter()
                .chain(o.allowed_versions)
                .map(String::from)
                .collect();
            Ok(Box::new(OsVersionPolicy {
                os: o.os.unwrap_or_else(|| "windows".to_string()),
                allowed_versions,
            }))
        }
        "device_model" => {
            let o: AllowListOptions = options(name, opts)?;
            Ok(Box::new(DeviceModelPolicy { allowed: o.allowed }))
        }
        "chassis_type" => {
            let o: AllowListOptions = options(name, opts)?;
            Ok(Box::new(ChassisTypePolicy { allowed: o.allowed }))
        }
        other => Err(PolicyError::Unknown(other.to_string())),
    }
}

/// Construct every policy a gate entry names, in order.
pub fn parse_gate(value: &Value) -> Result<Vec<Box<dyn Policy>>, PolicyError> {
    let Value::Sequence(items) = value else {
        return Err(PolicyError::NotAList);
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(name) => new_policy(name, None),
            Value::Mapping(m) if m.len() == 1 => match m.iter().next() {
                Some((Value::String(name), opts)) => new_policy(name, Some(opts)),
                _ => Err(PolicyError::InvalidSpecifier(format!("{item:?}"))),
            },
            other => Err(PolicyError::InvalidSpecifier(format!("{other:?}"))),
        })
        .collect()
}
