//! `task.create`: register a scheduled task running as SYSTEM.

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveTime};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{command, decode, require_windows, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ACTION: &str = "task.create";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Boot,
    /// Once, at `time` (default: one minute from now).
    #[default]
    Time,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub trigger: Trigger,
    /// `HH:MM`, only used by the time trigger.
    pub time: Option<String>,
}

#[derive(Debug)]
pub struct CreateTask {
    pub config: TaskConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(CreateTask {
        config: decode(ACTION, value)?,
    }))
}

fn parse_time(s: &str) -> Result<NaiveTime, ActionError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| ActionError::invalid(ACTION, format!("time must be HH:MM, got {s:?}")))
}

impl CreateTask {
    /// The `/TR` command line.
    fn task_run(&self) -> String {
        let program = if self.config.command.contains(' ') {
            format!("\"{}\"", self.config.command)
        } else {
            self.config.command.clone()
        };
        std::iter::once(program)
            .chain(self.config.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn args(&self, now: NaiveTime) -> Result<Vec<String>, ActionError> {
        let mut args = vec![
            "/Create".to_string(),
            "/TN".to_string(),
            self.config.name.clone(),
            "/TR".to_string(),
            self.task_run(),
            "/RU".to_string(),
            "SYSTEM".to_string(),
            "/F".to_string(),
            "/SC".to_string(),
        ];
        match self.config.trigger {
            Trigger::Boot => args.push("ONSTART".to_string()),
            Trigger::Time => {
                let start = match &self.config.time {
                    Some(t) => parse_time(t)?,
                    None => now + Duration::minutes(1),
                };
                args.push("ONCE".to_string());
                args.push("/ST".to_string());
                args.push(start.format("%H:%M").to_string());
            }
        }
        Ok(args)
    }
}

#[async_trait]
impl Action for CreateTask {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.name.is_empty() || self.config.command.is_empty() {
            return Err(ActionError::invalid(ACTION, "name and command are required"));
        }
        if let Some(t) = &self.config.time {
            parse_time(t)?;
        }
        Ok(())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        require_windows(ACTION)?;
        info!(name = %self.config.name, trigger = ?self.config.trigger, "creating scheduled task");
        let args = self.args(Local::now().time())?;
        command::run(ctx, ACTION, "schtasks.exe", &args).await?;
        Ok(())
    }
}
