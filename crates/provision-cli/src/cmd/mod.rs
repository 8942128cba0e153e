pub mod run;
pub mod stage;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use provision_core::settings::WarnLevel;
use provision_core::{paths, BuildInfo, CancelHandle, Cancellation, EngineSettings};
use tracing::warn;

/// Flags shared by every subcommand.
pub struct GlobalArgs {
    pub settings: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub json: bool,
}

#[derive(Args)]
pub struct SourceArgs {
    /// Root configuration: local path or http(s) URL
    #[arg(env = "PROVISION_CONFIG")]
    pub source: String,

    /// Parse documents as-is, without template substitution
    #[arg(long)]
    pub no_template: bool,

    /// Abort the whole run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Resolve engine settings: an explicit file must exist; otherwise the
/// state directory's settings file is used when present. `--state-dir`
/// overrides whatever the file says.
pub fn load_settings(global: &GlobalArgs) -> anyhow::Result<EngineSettings> {
    let mut settings = match &global.settings {
        Some(path) => EngineSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => {
            let dir = global.state_dir.clone().unwrap_or_else(paths::default_state_dir);
            let path = paths::settings_file(&dir);
            EngineSettings::load_or_default(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?
        }
    };
    if let Some(dir) = &global.state_dir {
        settings.state_dir = dir.clone();
    }

    let warnings = settings.validate();
    for w in &warnings {
        warn!(level = ?w.level, "settings: {}", w.message);
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("settings validation found errors");
    }
    Ok(settings)
}

/// Template context for this run, or `None` when templating is off.
pub fn build_info(settings: &EngineSettings, source: &SourceArgs) -> Option<BuildInfo> {
    if source.no_template || !settings.templating {
        return None;
    }
    Some(BuildInfo::collect(&settings.state_dir))
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A context ended by Ctrl-C or by `--timeout`. Must be called inside the
/// runtime.
pub fn cancellation(timeout: Option<u64>) -> Cancellation {
    let (handle, cancel) = Cancellation::new();
    tokio::spawn(cancel_on_interrupt(handle));
    match timeout {
        Some(secs) => cancel.with_timeout(Duration::from_secs(secs)),
        None => cancel,
    }
}

async fn cancel_on_interrupt(handle: CancelHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling");
        handle.cancel();
    }
}
