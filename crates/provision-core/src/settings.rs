use crate::error::Result;
use crate::paths;
use crate::retry::Backoff;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// SettingsWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

/// Engine tunables. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Total attempts for a remote document fetch.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub fetch_base_delay_ms: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Base of the exponential backoff between action attempts.
    #[serde(default = "default_base_delay_ms")]
    pub action_base_delay_ms: u64,
    #[serde(default = "paths::default_state_dir")]
    pub state_dir: PathBuf,
    /// Render documents as templates before parsing.
    #[serde(default = "default_templating")]
    pub templating: bool,
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_templating() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fetch_attempts: default_fetch_attempts(),
            fetch_base_delay_ms: default_base_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            action_base_delay_ms: default_base_delay_ms(),
            state_dir: paths::default_state_dir(),
            templating: default_templating(),
        }
    }
}

impl EngineSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Load `path` when it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn fetch_backoff(&self) -> Backoff {
        Backoff::new(
            self.fetch_attempts,
            Duration::from_millis(self.fetch_base_delay_ms),
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn action_base_delay(&self) -> Duration {
        Duration::from_millis(self.action_base_delay_ms)
    }

    pub fn validate(&self) -> Vec<SettingsWarning> {
        let mut warnings = Vec::new();

        if self.fetch_attempts == 0 {
            warnings.push(SettingsWarning {
                level: WarnLevel::Error,
                message: "fetch_attempts must be at least 1".to_string(),
            });
        } else if self.fetch_attempts > 10 {
            warnings.push(SettingsWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "fetch_attempts={} (>10 is unusual; backoff doubles each attempt)",
                    self.fetch_attempts
                ),
            });
        }

        if self.fetch_timeout_secs == 0 {
            warnings.push(SettingsWarning {
                level: WarnLevel::Error,
                message: "fetch_timeout_secs must be greater than zero".to_string(),
            });
        }

        for (name, ms) in [
            ("fetch_base_delay_ms", self.fetch_base_delay_ms),
            ("action_base_delay_ms", self.action_base_delay_ms),
        ] {
            if ms == 0 {
                warnings.push(SettingsWarning {
                    level: WarnLevel::Warning,
                    message: format!("{name}=0 retries without waiting"),
                });
            } else if ms > 60_000 {
                warnings.push(SettingsWarning {
                    level: WarnLevel::Warning,
                    message: format!("{name}={ms} exceeds one minute"),
                });
            }
        }

        if self.state_dir.as_os_str().is_empty() {
            warnings.push(SettingsWarning {
                level: WarnLevel::Error,
                message: "state_dir must not be empty".to_string(),
            });
        } else if self.state_dir.is_relative() {
            warnings.push(SettingsWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "state_dir '{}' is relative; it resolves against the working directory",
                    self.state_dir.display()
                ),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let s = EngineSettings::default();
        assert_eq!(s.fetch_attempts, 3);
        assert_eq!(s.fetch_base_delay_ms, 1000);
        assert_eq!(s.fetch_timeout_secs, 30);
        assert_eq!(s.action_base_delay_ms, 1000);
        assert!(s.templating);
        assert_eq!(s.fetch_backoff(), Backoff::new(3, Duration::from_secs(1)));
    }

    #[test]
    fn default_settings_have_no_warnings() {
        assert!(EngineSettings::default().validate().is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "fetch_attempts: 5\ntemplating: false\n").unwrap();
        let s = EngineSettings::load(&path).unwrap();
        assert_eq!(s.fetch_attempts, 5);
        assert!(!s.templating);
        assert_eq!(s.fetch_timeout_secs, 30);
    }

    #[test]
    fn empty_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(EngineSettings::load(&path).unwrap(), EngineSettings::default());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "fetch_atempts: 5\n").unwrap();
        assert!(EngineSettings::load(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let s = EngineSettings::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(s, EngineSettings::default());
    }

    #[test]
    fn validate_flags_zero_timeout_as_error() {
        let s = EngineSettings {
            fetch_timeout_secs: 0,
            ..EngineSettings::default()
        };
        let warnings = s.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("fetch_timeout_secs")));
    }

    #[test]
    fn validate_zero_attempts_is_error_zero_delays_warn() {
        let s = EngineSettings {
            fetch_attempts: 0,
            fetch_base_delay_ms: 0,
            action_base_delay_ms: 0,
            ..EngineSettings::default()
        };
        let warnings = s.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("fetch_attempts")));
        for name in ["fetch_base_delay_ms", "action_base_delay_ms"] {
            assert!(warnings
                .iter()
                .any(|w| w.level == WarnLevel::Warning && w.message.starts_with(name)));
        }
    }

    #[test]
    fn validate_warns_on_relative_state_dir() {
        let s = EngineSettings {
            state_dir: PathBuf::from("state"),
            ..EngineSettings::default()
        };
        let warnings = s.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }
}
