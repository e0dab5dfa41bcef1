use std::fmt::Write;
use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use gitcache_lockfile::scan_lockfile;

use crate::commands::ExitStatus;
use crate::printer::Printer;

/// List the Git-sourced dependencies of a lockfile.
pub(crate) fn scan(lockfile: Option<&Path>, json: bool, mut printer: Printer) -> Result<ExitStatus> {
    let path = lockfile.unwrap_or_else(|| Path::new("package-lock.json"));
    let result = scan_lockfile(path)?;

    if json {
        printer.stdout(serde_json::to_string_pretty(&result)?);
        return Ok(ExitStatus::Success);
    }

    if !result.has_git {
        writeln!(
            printer,
            "No Git dependencies in {} (lockfile v{})",
            path.display().cyan(),
            result.schema_version
        )?;
        return Ok(ExitStatus::Success);
    }

    writeln!(
        printer,
        "Found {} Git {} in {} (lockfile v{}):",
        result.dependencies.len().bold(),
        if result.dependencies.len() == 1 {
            "dependency"
        } else {
            "dependencies"
        },
        path.display().cyan(),
        result.schema_version
    )?;
    for dep in &result.dependencies {
        writeln!(
            printer,
            "  {} {} ({})",
            dep.name.bold(),
            dep.reference.dimmed(),
            dep.preferred_url
        )?;
    }

    Ok(ExitStatus::Success)
}
