use std::fmt::Write;
use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use gitcache_dispatch::PrepareOptions;
use gitcache_git::BuildOptions;

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Build or fetch tarballs for every Git dependency of a lockfile.
pub(crate) async fn prepare(
    context: &Context,
    lockfile: Option<&Path>,
    force: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let path = lockfile.unwrap_or_else(|| Path::new("package-lock.json"));

    let preparer = context.preparer(BuildOptions {
        force,
        ..BuildOptions::default()
    });
    let options = PrepareOptions {
        force,
        ..PrepareOptions::default()
    };
    let report = preparer.prepare(path, &options).await?;

    if report.scanned == 0 {
        writeln!(printer, "No Git dependencies to prepare")?;
        return Ok(ExitStatus::Success);
    }

    writeln!(
        printer,
        "Prepared {} of {} Git {}",
        report.succeeded().bold(),
        report.scanned,
        if report.scanned == 1 {
            "dependency"
        } else {
            "dependencies"
        },
    )?;
    for outcome in report.outcomes.iter().filter(|outcome| !outcome.is_ok()) {
        writeln!(
            printer,
            "  {} {}: {}",
            "skipped".yellow(),
            outcome.name.bold(),
            outcome.error.as_deref().unwrap_or("unknown error")
        )?;
    }

    Ok(if report.is_success() {
        ExitStatus::Success
    } else {
        ExitStatus::Failure
    })
}
