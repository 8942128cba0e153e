use std::path::Path;

use serde::Serialize;

use crate::stage::StageStore;

pub const STAGE_ENV: &str = "PROVISION_STAGE";
pub const IMAGE_ID_ENV: &str = "IMAGE_ID";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Values available to document templates as `{{.Field}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub hostname: String,
    pub stage: String,
    pub timestamp: String,
    pub image_id: String,
    pub username: String,
}

impl BuildInfo {
    /// Field names as they appear in templates.
    pub const FIELDS: [&'static str; 5] = ["Hostname", "Stage", "Timestamp", "ImageID", "Username"];

    /// Snapshot the current host. The stage comes from `PROVISION_STAGE`,
    /// then the stage file under `state_dir`, then `"0"`.
    pub fn collect(state_dir: &Path) -> Self {
        let stage = non_empty_env(STAGE_ENV)
            .or_else(|| match StageStore::new(state_dir).current() {
                Ok(record) => record.map(|r| r.id),
                Err(e) => {
                    tracing::debug!(error = %e, "stage file unreadable, using default stage");
                    None
                }
            })
            .unwrap_or_else(|| "0".to_string());

        Self {
            hostname: hostname(),
            stage,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            image_id: non_empty_env(IMAGE_ID_ENV).unwrap_or_default(),
            username: non_empty_env("USERNAME")
                .or_else(|| non_empty_env("USER"))
                .unwrap_or_else(|| "SYSTEM".to_string()),
        }
    }

    /// Look up a template field by its template name.
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "Hostname" => Some(&self.hostname),
            "Stage" => Some(&self.stage),
            "Timestamp" => Some(&self.timestamp),
            "ImageID" => Some(&self.image_id),
            "Username" => Some(&self.username),
            _ => None,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn hostname() -> String {
    non_empty_env("COMPUTERNAME")
        .or_else(|| non_empty_env("HOSTNAME"))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
