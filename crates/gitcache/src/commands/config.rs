use std::fmt::Write;

use anyhow::{bail, Result};
use owo_colors::OwoColorize;

use gitcache_cache::{parse_size, CacheConfig};

use crate::commands::{Context, ExitStatus};
use crate::printer::Printer;

const MAX_CACHE_SIZE: &str = "maxCacheSize";

/// Read or write persisted settings.
pub(crate) fn config(
    context: &Context,
    list: bool,
    get: Option<&str>,
    set: Option<&str>,
    mut printer: Printer,
) -> Result<ExitStatus> {
    let path = context.cache.config_file();
    let mut config = CacheConfig::load(&path)?;

    if let Some(assignment) = set {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("expected `key=value`, got `{assignment}`");
        };
        match key {
            MAX_CACHE_SIZE => {
                // Validate before persisting.
                parse_size(value)?;
                config.max_cache_size = value.to_string();
                config.store(&path)?;
                writeln!(printer, "{} = {}", MAX_CACHE_SIZE.bold(), value.cyan())?;
            }
            _ => bail!("unknown setting `{key}`"),
        }
        return Ok(ExitStatus::Success);
    }

    if let Some(key) = get {
        match key {
            MAX_CACHE_SIZE => writeln!(printer, "{}", config.max_cache_size)?,
            _ => bail!("unknown setting `{key}`"),
        }
        return Ok(ExitStatus::Success);
    }

    // `--list`, and the default with no flags.
    let _ = list;
    writeln!(
        printer,
        "{} = {}",
        MAX_CACHE_SIZE.bold(),
        config.max_cache_size.cyan()
    )?;
    Ok(ExitStatus::Success)
}
