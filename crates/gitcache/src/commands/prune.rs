use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;

use gitcache_cache::{format_size, parse_size, CacheConfig, Pruner};

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Evict least-recently-used tarballs down to a size bound.
pub(crate) fn prune(
    context: &Context,
    max_size: Option<&str>,
    dry_run: bool,
    set_default: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let config_path = context.cache.config_file();
    let mut config = CacheConfig::load(&config_path)?;

    let bound_text = max_size.map_or_else(|| config.max_cache_size.clone(), ToString::to_string);
    let bound = parse_size(&bound_text)?;

    if set_default {
        config.max_cache_size = bound_text.clone();
        config.store(&config_path)?;
        writeln!(printer, "Default cache size set to {}", bound_text.cyan())?;
    }

    let report = Pruner::new(context.cache.tarballs(), bound)
        .dry_run(dry_run)
        .prune()?;

    if report.scanned == 0 {
        writeln!(printer, "No tarballs to prune")?;
        return Ok(ExitStatus::Success);
    }
    if report.deleted == 0 {
        writeln!(
            printer,
            "Cache is within {} ({} entries)",
            bound_text.cyan(),
            report.scanned
        )?;
        return Ok(ExitStatus::Success);
    }

    writeln!(
        printer,
        "{} {} {} ({} freed)",
        if dry_run { "Would delete" } else { "Deleted" },
        report.deleted.bold(),
        if report.deleted == 1 { "entry" } else { "entries" },
        format_size(report.space_saved).cyan()
    )?;

    Ok(ExitStatus::Success)
}
