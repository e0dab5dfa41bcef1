use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use crate::GitError;

/// Bound on any single `git` or `npm` invocation.
pub(crate) const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a successful invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub(crate) stdout: String,
}

/// Run an external tool to completion under [`PROCESS_TIMEOUT`].
///
/// A non-zero exit becomes [`GitError::Command`] carrying the trimmed
/// stdout/stderr; a timeout kills the child (`kill_on_drop`) and surfaces
/// as [`GitError::Timeout`].
pub(crate) async fn run_tool(
    program: &Path,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<ToolOutput, GitError> {
    let cmd_display = format!(
        "{} {}",
        program.file_name().unwrap_or(program.as_os_str()).to_string_lossy(),
        args.join(" ")
    );
    trace!("Running `{cmd_display}` in {}", cwd.display());

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| GitError::Spawn(cmd_display.clone(), err))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| GitError::Timeout(cmd_display.clone(), timeout.as_secs()))?
        .map_err(|err| GitError::Spawn(cmd_display.clone(), err))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        Ok(ToolOutput { stdout })
    } else {
        Err(GitError::Command {
            message: format!("`{cmd_display}` failed"),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
