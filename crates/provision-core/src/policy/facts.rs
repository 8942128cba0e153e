//! Host facts consulted by policies.

use std::process::Command;

/// Read-only view of the machine a gate is evaluated on. Empty strings mean
/// "could not be detected".
pub trait HostFacts: Send + Sync {
    /// Lower-case OS family, e.g. `windows`, `linux`, `macos`.
    fn os_family(&self) -> String;
    /// User-facing version, e.g. `11`, `Server 2022`, `24.04`.
    fn os_version(&self) -> String;
    fn device_model(&self) -> String;
    /// Chassis category, see [`chassis_name`].
    fn chassis_type(&self) -> String;
}

/// Facts detected from the running system on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFacts;

impl HostFacts for SystemFacts {
    fn os_family(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn os_version(&self) -> String {
        if cfg!(windows) {
            windows::os_version()
        } else if cfg!(target_os = "linux") {
            linux::os_version().unwrap_or_else(|| std::env::consts::OS.to_string())
        } else {
            std::env::consts::OS.to_string()
        }
    }

    fn device_model(&self) -> String {
        if cfg!(windows) {
            windows::cim("(Get-CimInstance Win32_ComputerSystem).Model").unwrap_or_default()
        } else if cfg!(target_os = "linux") {
            linux::dmi("product_name").unwrap_or_default()
        } else {
            String::new()
        }
    }

    fn chassis_type(&self) -> String {
        let code = if cfg!(windows) {
            windows::cim("(Get-CimInstance Win32_SystemEnclosure).ChassisTypes[0]")
        } else if cfg!(target_os = "linux") {
            linux::dmi("chassis_type")
        } else {
            None
        };
        code.and_then(|c| c.parse::<u32>().ok())
            .map(chassis_name)
            .unwrap_or_default()
    }
}

/// Fixed facts, for tests and dry runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticFacts {
    pub os_family: String,
    pub os_version: String,
    pub device_model: String,
    pub chassis_type: String,
}

impl HostFacts for StaticFacts {
    fn os_family(&self) -> String {
        self.os_family.clone()
    }

    fn os_version(&self) -> String {
        self.os_version.clone()
    }

    fn device_model(&self) -> String {
        self.device_model.clone()
    }

    fn chassis_type(&self) -> String {
        self.chassis_type.clone()
    }
}

/// SMBIOS chassis code to category.
pub fn chassis_name(code: u32) -> String {
    match code {
        1 => "other".into(),
        2 => "unknown".into(),
        3..=7 => "desktop".into(),
        8..=12 | 14 | 18 | 21 => "laptop".into(),
        13 => "allinone".into(),
        15 | 16 => "server".into(),
        17 => "docking".into(),
        30..=32 => "tablet".into(),
        other => format!("type_{other}"),
    }
}

/// Map an OS caption to the user-facing version, e.g.
/// "Microsoft Windows Server 2022 Standard" → "Server 2022".
pub fn windows_version_from_caption(caption: &str) -> Option<&'static str> {
    let lower = caption.to_lowercase();
    [
        ("server 2025", "Server 2025"),
        ("server 2022", "Server 2022"),
        ("server 2019", "Server 2019"),
        ("server 2016", "Server 2016"),
        ("windows 11", "11"),
        ("windows 10", "10"),
    ]
    .into_iter()
    .find(|(needle, _)| lower.contains(needle))
    .map(|(_, version)| version)
}

/// Client builds from 22000 onward are Windows 11.
pub fn windows_version_from_build(build: u32) -> &'static str {
    if build >= 22000 {
        "11"
    } else {
        "10"
    }
}

fn run_trimmed(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

mod windows {
    use super::*;

    pub(super) fn cim(expr: &str) -> Option<String> {
        run_trimmed(
            "powershell.exe",
            &["-NoProfile", "-NonInteractive", "-Command", expr],
        )
    }

    pub(super) fn os_version() -> String {
        if let Some(version) = cim("(Get-CimInstance Win32_OperatingSystem).Caption")
            .as_deref()
            .and_then(windows_version_from_caption)
        {
            return version.to_string();
        }
        let build = cim("[Environment]::OSVersion.Version.Build")
            .and_then(|b| b.parse::<u32>().ok())
            .unwrap_or(0);
        windows_version_from_build(build).to_string()
    }
}

mod linux {
    pub(super) fn os_version() -> Option<String> {
        let release = std::fs::read_to_string("/etc/os-release").ok()?;
        parse_os_release_version(&release)
    }

    pub(super) fn dmi(field: &str) -> Option<String> {
        let value = std::fs::read_to_string(format!("/sys/class/dmi/id/{field}")).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    pub(super) fn parse_os_release_version(release: &str) -> Option<String> {
        release
            .lines()
            .find_map(|line| line.strip_prefix("VERSION_ID="))
            .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|v| !v.is_empty())
    }
}
