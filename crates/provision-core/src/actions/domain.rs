//! `domain.join`: join the machine to an Active Directory domain.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::command::{self, ps_quote};
use super::{decode_shorthand, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ACTION: &str = "domain.join";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainJoinConfig {
    pub domain: String,
    pub ou: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DomainJoinConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainJoinConfig")
            .field("domain", &self.domain)
            .field("ou", &self.ou)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct DomainJoin {
    pub config: DomainJoinConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(DomainJoin {
        config: decode_shorthand(ACTION, "domain", value)?,
    }))
}

impl DomainJoin {
    fn script(&self) -> String {
        let cfg = &self.config;
        let mut script = format!("Add-Computer -DomainName {} -Force", ps_quote(&cfg.domain));
        if !cfg.ou.is_empty() {
            script.push_str(&format!(" -OUPath {}", ps_quote(&cfg.ou)));
        }
        if !cfg.user.is_empty() {
            script = format!(
                "$cred = New-Object System.Management.Automation.PSCredential({}, (ConvertTo-SecureString {} -AsPlainText -Force)); {script} -Credential $cred",
                ps_quote(&cfg.user),
                ps_quote(&cfg.password),
            );
        }
        script
    }
}

#[async_trait]
impl Action for DomainJoin {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.domain.is_empty() {
            return Err(ActionError::invalid(ACTION, "domain is required"));
        }
        if !self.config.user.is_empty() && self.config.password.is_empty() {
            return Err(ActionError::invalid(ACTION, "password is required when user is set"));
        }
        Ok(())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        info!(domain = %self.config.domain, ou = %self.config.ou, "joining domain");
        command::powershell(ctx, ACTION, &self.script()).await?;
        Ok(())
    }
}
