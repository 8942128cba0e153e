//! `system.power`: reboot or shut down the host.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::warn;

use super::{command, decode_shorthand, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ACTION: &str = "system.power";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerKind {
    Reboot,
    Shutdown,
}

/// Reason recorded with the shutdown event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerReason {
    #[default]
    None,
    Maintenance,
    Installation,
    Upgrade,
}

impl PowerReason {
    /// Minor reason code passed to `shutdown.exe /d`.
    fn minor_code(self) -> u32 {
        match self {
            PowerReason::None => 0,
            PowerReason::Maintenance => 1,
            PowerReason::Installation => 2,
            PowerReason::Upgrade => 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerConfig {
    #[serde(rename = "type")]
    pub kind: Option<PowerKind>,
    /// Seconds before the power change.
    pub delay: u32,
    pub reason: PowerReason,
    pub force: bool,
}

#[derive(Debug)]
pub struct Power {
    pub config: PowerConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(Power {
        config: decode_shorthand(ACTION, "type", value)?,
    }))
}

impl Power {
    fn kind(&self) -> Result<PowerKind, ActionError> {
        self.config
            .kind
            .ok_or_else(|| ActionError::invalid(ACTION, "type must be reboot or shutdown"))
    }

    fn windows_args(&self, kind: PowerKind) -> Vec<String> {
        let mut args = vec![
            match kind {
                PowerKind::Reboot => "/r",
                PowerKind::Shutdown => "/s",
            }
            .to_string(),
            "/t".to_string(),
            self.config.delay.to_string(),
            "/d".to_string(),
            format!("p:0:{}", self.config.reason.minor_code()),
        ];
        if self.config.force {
            args.push("/f".to_string());
        }
        args
    }

    /// `shutdown(8)` schedules in whole minutes.
    fn unix_args(&self, kind: PowerKind) -> Vec<String> {
        let when = match self.config.delay {
            0 => "now".to_string(),
            secs => format!("+{}", secs.div_ceil(60)),
        };
        let flag = match kind {
            PowerKind::Reboot => "-r",
            PowerKind::Shutdown => "-h",
        };
        vec![flag.to_string(), when]
    }
}

#[async_trait]
impl Action for Power {
    fn validate(&self) -> Result<(), ActionError> {
        self.kind().map(|_| ())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        let kind = self.kind()?;
        warn!(?kind, delay = self.config.delay, reason = ?self.config.reason, "changing power state");
        if cfg!(windows) {
            command::run(ctx, ACTION, "shutdown.exe", &self.windows_args(kind)).await?;
        } else {
            command::run(ctx, ACTION, "shutdown", &self.unix_args(kind)).await?;
        }
        Ok(())
    }
}
