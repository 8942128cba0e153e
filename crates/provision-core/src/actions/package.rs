//! `googet.install`: install packages with the GooGet package manager.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{command, decode, require_windows, scalar_text, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ACTION: &str = "googet.install";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GooGetConfig {
    pub packages: Vec<String>,
    pub reinstall: bool,
    /// Record the package in the local database without running installers.
    pub db_only: bool,
}

#[derive(Debug)]
pub struct GooGetInstall {
    pub config: GooGetConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(GooGetInstall {
        config: parse_config(value)?,
    }))
}

/// A bare list or single string names the packages directly.
fn parse_config(value: &Value) -> Result<GooGetConfig, ActionError> {
    match value {
        Value::Sequence(items) => Ok(GooGetConfig {
            packages: items
                .iter()
                .map(|item| {
                    scalar_text(item)
                        .ok_or_else(|| ActionError::config(ACTION, format!("package must be a string, got {item:?}")))
                })
                .collect::<Result<_, _>>()?,
            ..GooGetConfig::default()
        }),
        Value::String(pkg) => Ok(GooGetConfig {
            packages: vec![pkg.clone()],
            ..GooGetConfig::default()
        }),
        other => decode(ACTION, other),
    }
}

impl GooGetInstall {
    fn args(&self, package: &str) -> Vec<String> {
        let mut args = vec!["-noconfirm".to_string(), "install".to_string()];
        if self.config.reinstall {
            args.push("-reinstall".to_string());
        }
        if self.config.db_only {
            args.push("-db_only".to_string());
        }
        args.push(package.to_string());
        args
    }
}

#[async_trait]
impl Action for GooGetInstall {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.packages.is_empty() {
            return Err(ActionError::invalid(ACTION, "packages list is empty"));
        }
        if self.config.packages.iter().any(|p| p.trim().is_empty()) {
            return Err(ActionError::invalid(ACTION, "package names must not be blank"));
        }
        Ok(())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        require_windows(ACTION)?;
        let googet = command::locate("googet")
            .ok_or_else(|| ActionError::failed(ACTION, "googet not found on PATH"))?;
        let program = googet.to_string_lossy();
        for package in &self.config.packages {
            info!(package, "installing package");
            command::run(ctx, ACTION, &program, &self.args(package))
                .await
                .map_err(|e| ActionError::failed(ACTION, format!("failed to install package {package}: {e}")))?;
        }
        Ok(())
    }
}
