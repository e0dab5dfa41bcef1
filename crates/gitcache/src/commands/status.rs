use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde_json::json;

use gitcache_cache::{format_size, TARBALL_NAME};
use gitcache_git::BuildOptions;

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

/// Show cache and registry health.
pub(crate) async fn status(
    context: &Context,
    detailed: bool,
    json: bool,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let content_stats = context.content_cache().stats();
    let (tarball_count, tarball_bytes) = tarball_stats(context);
    let tiers = context.preparer(BuildOptions::default()).hierarchy().status();
    let session = context.auth.load()?;
    let authenticated = context.auth.is_authenticated();

    if json {
        let body = json!({
            "cacheRoot": context.cache.root(),
            "tarballs": { "count": tarball_count, "bytes": tarball_bytes },
            "contentCache": {
                "count": content_stats.file_count,
                "bytes": content_stats.total_bytes,
            },
            "authenticated": authenticated,
            "orgId": session.as_ref().map(|record| record.org_id.clone()),
            "tiers": tiers
                .iter()
                .map(|tier| json!({ "name": tier.name, "available": tier.available }))
                .collect::<Vec<_>>(),
        });
        printer.stdout(serde_json::to_string_pretty(&body)?);
        return Ok(ExitStatus::Success);
    }

    writeln!(printer, "Cache root: {}", context.cache.root().display().cyan())?;
    writeln!(
        printer,
        "Tarballs:   {} entries, {}",
        tarball_count.bold(),
        format_size(tarball_bytes)
    )?;
    writeln!(
        printer,
        "Content:    {} entries, {}",
        content_stats.file_count.bold(),
        format_size(content_stats.total_bytes)
    )?;
    writeln!(
        printer,
        "Registry:   {}",
        if authenticated {
            "authenticated".green().to_string()
        } else {
            "not authenticated".yellow().to_string()
        }
    )?;

    if detailed {
        for tier in tiers {
            writeln!(
                printer,
                "  tier {:<10} {}",
                tier.name.bold(),
                if tier.available {
                    "available".green().to_string()
                } else {
                    "unavailable".dimmed().to_string()
                }
            )?;
        }
        if let Some(record) = session {
            if !record.token.is_empty() {
                writeln!(
                    printer,
                    "  session for {} ({})",
                    record.org_id.bold(),
                    record.email.as_deref().unwrap_or("no email")
                )?;
            }
        }
    }

    Ok(ExitStatus::Success)
}

/// Entry count and tarball bytes under `tarballs/`.
fn tarball_stats(context: &Context) -> (u64, u64) {
    let Ok(entries) = fs_err::read_dir(context.cache.tarballs()) else {
        return (0, 0);
    };
    let mut count = 0;
    let mut bytes = 0;
    for entry in entries.flatten() {
        let tarball = entry.path().join(TARBALL_NAME);
        if let Ok(metadata) = fs_err::metadata(tarball) {
            count += 1;
            bytes += metadata.len();
        }
    }
    (count, bytes)
}
