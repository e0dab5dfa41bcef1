use std::fmt::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;

use gitcache_dispatch::PrepareOptions;
use gitcache_git::BuildOptions;

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Accelerate the lockfile's Git dependencies, then delegate to
/// `npm install` with its cache redirected into the gitcache root.
pub(crate) async fn install(
    context: &Context,
    npm_args: &[String],
    mut printer: Printer,
) -> Result<ExitStatus> {
    let lockfile = Path::new("package-lock.json");

    if lockfile.exists() {
        let preparer = context.preparer(BuildOptions::default());
        let report = preparer.prepare(lockfile, &PrepareOptions::default()).await?;
        if report.scanned > 0 {
            writeln!(
                printer,
                "Accelerated {} of {} Git dependencies",
                report.succeeded().bold(),
                report.scanned
            )?;
        }
    } else {
        writeln!(printer, "No lockfile found; running npm directly")?;
    }

    // npm owns the terminal from here; no timeout, inherited stdio.
    let status = tokio::process::Command::new("npm")
        .arg("install")
        .args(npm_args)
        .env("NPM_CONFIG_CACHE", context.cache.root())
        .env("npm_config_cache", context.cache.root())
        .status()
        .await
        .context("failed to run `npm install`")?;

    Ok(if status.success() {
        ExitStatus::Success
    } else {
        ExitStatus::Failure
    })
}
