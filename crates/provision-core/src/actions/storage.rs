//! Disk actions: `disk.wipe` and `partition.disk`, via the Storage PowerShell module.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{info, warn};

use super::command::{self, ps_quote};
use super::{decode, decode_shorthand, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;

pub fn register(actions: &mut ActionRegistry) {
    actions.register("disk.wipe", |_: &ExecContext, value: &Value| {
        Ok(Box::new(DiskWipe {
            config: decode_shorthand("disk.wipe", "disk_id", value)?,
        }) as Box<dyn Action>)
    });
    actions.register("partition.disk", |_: &ExecContext, value: &Value| {
        Ok(Box::new(PartitionDisk {
            config: decode("partition.disk", value)?,
        }) as Box<dyn Action>)
    });
}

fn disk_number(action: &str, disk_id: Option<i64>) -> Result<i64, ActionError> {
    match disk_id {
        None => Err(ActionError::invalid(action, "disk_id is required")),
        Some(n) if n < 0 => Err(ActionError::invalid(action, "disk_id must be non-negative")),
        Some(n) => Ok(n),
    }
}

// ---------------------------------------------------------------------------
// disk.wipe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskWipeConfig {
    pub disk_id: Option<i64>,
    pub remove_data: bool,
    pub remove_oem: bool,
    /// Overwrite every sector. Slow.
    pub zero_disk: bool,
}

impl Default for DiskWipeConfig {
    fn default() -> Self {
        Self {
            disk_id: None,
            remove_data: true,
            remove_oem: true,
            zero_disk: false,
        }
    }
}

#[derive(Debug)]
pub struct DiskWipe {
    pub config: DiskWipeConfig,
}

impl DiskWipe {
    fn script(&self, disk: i64) -> String {
        let cfg = &self.config;
        let mut script = format!(
            "Get-Disk -Number {disk} -ErrorAction Stop | Clear-Disk -RemoveData:${} -RemoveOEM:${} -Confirm:$false",
            cfg.remove_data, cfg.remove_oem
        );
        if cfg.zero_disk {
            script.push_str(" -ZeroOutEntireDisk");
        }
        script
    }
}

#[async_trait]
impl Action for DiskWipe {
    fn validate(&self) -> Result<(), ActionError> {
        disk_number("disk.wipe", self.config.disk_id).map(|_| ())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        let disk = disk_number("disk.wipe", self.config.disk_id)?;
        warn!(
            disk,
            remove_data = self.config.remove_data,
            remove_oem = self.config.remove_oem,
            zero_disk = self.config.zero_disk,
            "wiping disk"
        );
        command::powershell(ctx, "disk.wipe", &self.script(disk)).await?;
        info!(disk, "disk wiped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// partition.disk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionConfig {
    pub disk_id: Option<i64>,
    /// Existing partition to act on; 0 creates a new maximum-size partition.
    pub partition_id: u32,
    /// Format the partition NTFS with this label.
    pub label: String,
    pub assign_letter: bool,
}

#[derive(Debug)]
pub struct PartitionDisk {
    pub config: PartitionConfig,
}

impl PartitionDisk {
    fn script(&self, disk: i64) -> String {
        let cfg = &self.config;
        let mut steps = Vec::new();
        if cfg.partition_id == 0 {
            let letter = if cfg.assign_letter { " -AssignDriveLetter" } else { "" };
            steps.push(format!(
                "$p = New-Partition -DiskNumber {disk} -UseMaximumSize{letter} -ErrorAction Stop"
            ));
        } else {
            steps.push(format!(
                "$p = Get-Partition -DiskNumber {disk} -PartitionNumber {} -ErrorAction Stop",
                cfg.partition_id
            ));
            if cfg.assign_letter {
                steps.push("$p | Add-PartitionAccessPath -AssignDriveLetter".to_string());
            }
        }
        if !cfg.label.is_empty() {
            steps.push(format!(
                "$p | Format-Volume -FileSystem NTFS -NewFileSystemLabel {} -Confirm:$false",
                ps_quote(&cfg.label)
            ));
        }
        steps.join("; ")
    }
}

#[async_trait]
impl Action for PartitionDisk {
    fn validate(&self) -> Result<(), ActionError> {
        disk_number("partition.disk", self.config.disk_id).map(|_| ())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        let disk = disk_number("partition.disk", self.config.disk_id)?;
        info!(
            disk,
            partition = self.config.partition_id,
            label = %self.config.label,
            "partitioning disk"
        );
        command::powershell(ctx, "partition.disk", &self.script(disk)).await?;
        Ok(())
    }
}
