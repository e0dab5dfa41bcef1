use std::fmt::Write;

use anyhow::{bail, Result};
use owo_colors::OwoColorize;

use gitcache_git::BuildOptions;
use gitcache_urls::{canonicalize, extract_ref, is_git_url};

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Resolve one repository's ref, and with `--build`, stage its tarball.
pub(crate) async fn add(
    context: &Context,
    repo: &str,
    reference: Option<&str>,
    force: bool,
    build: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    if !is_git_url(repo) {
        bail!("`{repo}` does not look like a Git repository URL");
    }

    if build {
        let preparer = context.preparer(BuildOptions {
            force,
            ..BuildOptions::default()
        });
        let package_id = preparer.prime(repo, reference, force).await?;
        writeln!(
            printer,
            "Staged {} at {}",
            package_id.git_url().cyan(),
            package_id.commit().dimmed()
        )?;
    } else {
        let url = canonicalize(repo);
        let reference = match reference {
            Some(reference) => reference.to_string(),
            None => extract_ref(&url).to_string(),
        };
        let commit = context.resolver().resolve(&url, &reference).await?;
        writeln!(
            printer,
            "Resolved {} {} {}",
            reference.bold(),
            "->".dimmed(),
            commit
        )?;
    }

    Ok(ExitStatus::Success)
}
