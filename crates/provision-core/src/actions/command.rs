//! Cancellable subprocess invocation for actions backed by platform tools.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::ActionError;
use crate::context::ExecContext;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Resolve `program` on `PATH`.
pub fn locate(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Run `program` to completion, killing it if the context ends first.
/// A non-zero exit is an `ActionError::Failed` carrying the tail of the
/// command's output.
pub async fn run(
    ctx: &ExecContext,
    action: &str,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, ActionError> {
    debug!(action, program, ?args, "spawning command");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ActionError::io(action, format!("cannot start {program}"), e))?;

    // Dropping the wait future on cancel kills the child.
    let output = ctx
        .cancel
        .run(child.wait_with_output())
        .await
        .map_err(|cause| ActionError::Cancelled {
            action: action.to_string(),
            cause,
        })?
        .map_err(|e| ActionError::io(action, format!("waiting for {program}"), e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(ActionError::failed(
            action,
            format!("{program} exited with {code}: {}", tail(&stderr, &stdout)),
        ));
    }
    Ok(CommandOutput { stdout, stderr })
}

/// Run a PowerShell script non-interactively. Windows only.
pub async fn powershell(ctx: &ExecContext, action: &str, script: &str) -> Result<CommandOutput, ActionError> {
    super::require_windows(action)?;
    let args = [
        "-NoProfile",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Bypass",
        "-Command",
        script,
    ]
    .map(String::from);
    run(ctx, action, "powershell.exe", &args).await
}

/// Quote `s` as a PowerShell single-quoted literal.
pub fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Last 500 characters of the most useful stream.
fn tail(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr }.trim();
    let count = text.chars().count();
    if count <= 500 {
        return text.to_string();
    }
    text.chars().skip(count - 500).collect()
}
