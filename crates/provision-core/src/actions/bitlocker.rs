//! `bitlocker.enable`: encrypt the system drive.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{command, decode_shorthand, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

const ACTION: &str = "bitlocker.enable";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectorMode {
    Tpm,
    RecoveryPassword,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BitLockerConfig {
    pub mode: Option<ProtectorMode>,
    /// Back the recovery password up to Active Directory.
    pub backup: bool,
}

#[derive(Debug)]
pub struct BitLockerEnable {
    pub config: BitLockerConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(BitLockerEnable {
        config: decode_shorthand(ACTION, "mode", value)?,
    }))
}

impl BitLockerEnable {
    fn script(&self, mode: ProtectorMode) -> String {
        let protector = match mode {
            ProtectorMode::Tpm => "-TpmProtector",
            ProtectorMode::RecoveryPassword => "-RecoveryPasswordProtector",
        };
        let mut steps = vec![format!(
            "Enable-BitLocker -MountPoint $env:SystemDrive -UsedSpaceOnly -SkipHardwareTest {protector}"
        )];
        if self.config.backup {
            if mode == ProtectorMode::Tpm {
                steps.push("Add-BitLockerKeyProtector -MountPoint $env:SystemDrive -RecoveryPasswordProtector".to_string());
            }
            steps.push(
                "$kp = (Get-BitLockerVolume -MountPoint $env:SystemDrive).KeyProtector | \
                 Where-Object KeyProtectorType -eq 'RecoveryPassword' | Select-Object -First 1"
                    .to_string(),
            );
            steps.push(
                "Backup-BitLockerKeyProtector -MountPoint $env:SystemDrive -KeyProtectorId $kp.KeyProtectorId"
                    .to_string(),
            );
        }
        steps.join("; ")
    }
}

#[async_trait]
impl Action for BitLockerEnable {
    fn validate(&self) -> Result<(), ActionError> {
        self.config
            .mode
            .map(|_| ())
            .ok_or_else(|| ActionError::invalid(ACTION, "mode is required"))
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        let mode = self
            .config
            .mode
            .ok_or_else(|| ActionError::invalid(ACTION, "mode is required"))?;
        info!(?mode, backup = self.config.backup, "enabling bitlocker");
        command::powershell(ctx, ACTION, &self.script(mode)).await?;
        Ok(())
    }
}
