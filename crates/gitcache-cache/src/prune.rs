use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs_err as fs;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{rm_rf, Removal, TARBALL_NAME};

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("failed to scan tarball cache at {0}")]
    Scan(PathBuf, #[source] std::io::Error),
}

/// One prunable artifact directory (`<40-hex>-<platform>`).
#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    size_bytes: u64,
    /// mtime of the tarball. atime is suppressed on many hosts, so mtime is
    /// the portable recency signal.
    access_time: SystemTime,
}

/// Accounting returned by a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub scanned: u64,
    pub deleted: u64,
    pub space_saved: u64,
    pub within_limit: bool,
}

/// LRU eviction of tarball directories down to a size bound.
#[derive(Debug)]
pub struct Pruner {
    tarballs: PathBuf,
    max_size: u64,
    dry_run: bool,
}

impl Pruner {
    pub fn new(tarballs: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            tarballs: tarballs.into(),
            max_size,
            dry_run: false,
        }
    }

    /// Report what would be deleted without deleting it.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Delete least-recently-used entries until the subtree fits the bound.
    pub fn prune(&self) -> Result<PruneReport, PruneError> {
        let mut entries = self.scan()?;
        let total: u64 = entries.iter().map(|entry| entry.size_bytes).sum();

        let mut report = PruneReport {
            scanned: entries.len() as u64,
            within_limit: total <= self.max_size,
            ..PruneReport::default()
        };
        if report.within_limit {
            return Ok(report);
        }

        entries.sort_by_key(|entry| entry.access_time);

        let mut remaining = total;
        let mut removed = Removal::default();
        for entry in entries {
            if remaining <= self.max_size {
                break;
            }
            debug!(
                "Pruning {} ({} bytes{})",
                entry.path.display(),
                entry.size_bytes,
                if self.dry_run { ", dry run" } else { "" }
            );
            if !self.dry_run {
                match rm_rf(&entry.path) {
                    Ok(removal) => removed += removal,
                    Err(err) => {
                        warn!("Failed to prune {}: {err}", entry.path.display());
                        continue;
                    }
                }
            }
            // Accounting is by tarball size, the number the bound and the
            // report are both defined over.
            remaining -= entry.size_bytes;
            report.deleted += 1;
            report.space_saved += entry.size_bytes;
        }

        if removed.num_files > 0 {
            debug!(
                "Removed {} files and {} directories, {} bytes on disk",
                removed.num_files, removed.num_dirs, removed.total_bytes
            );
        }

        report.within_limit = remaining <= self.max_size;
        Ok(report)
    }

    /// Enumerate artifact directories. Entries that cannot be statted are
    /// skipped rather than failing the pass.
    fn scan(&self) -> Result<Vec<CacheEntry>, PruneError> {
        if !self.tarballs.is_dir() {
            return Ok(Vec::new());
        }
        let dir = fs::read_dir(&self.tarballs)
            .map_err(|err| PruneError::Scan(self.tarballs.clone(), err))?;

        let mut entries = Vec::new();
        for item in dir {
            let Ok(item) = item else { continue };
            let path = item.path();
            let name = item.file_name();
            if !path.is_dir() || !is_artifact_dir_name(&name.to_string_lossy()) {
                continue;
            }
            let tarball = path.join(TARBALL_NAME);
            let Ok(metadata) = fs::metadata(&tarball) else {
                debug!("Skipping {} (no readable tarball)", path.display());
                continue;
            };
            let Ok(access_time) = metadata.modified() else {
                continue;
            };
            entries.push(CacheEntry {
                path,
                size_bytes: metadata.len(),
                access_time,
            });
        }
        Ok(entries)
    }
}

/// `<40-hex>-<platform>`, e.g. `0123…4567-linux-x64`.
fn is_artifact_dir_name(name: &str) -> bool {
    let Some((commit, platform)) = name.split_at_checked(40).map(|(c, rest)| (c, rest)) else {
        return false;
    };
    commit.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        && platform.len() > 1
        && platform.starts_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMITS: &[&str] = &[
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "cccccccccccccccccccccccccccccccccccccccc",
    ];

    fn write_entry(root: &Path, commit: &str, size: usize, age_secs: u64) -> PathBuf {
        let dir = root.join(format!("{commit}-linux-x64"));
        fs::create_dir_all(&dir).unwrap();
        let tarball = dir.join(TARBALL_NAME);
        fs::write(&tarball, vec![0u8; size]).unwrap();
        let mtime = SystemTime::now() - std::time::Duration::from_secs(age_secs);
        filetime::set_file_mtime(&tarball, filetime::FileTime::from_system_time(mtime)).unwrap();
        dir
    }

    #[test]
    fn within_limit_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(dir.path(), COMMITS[0], 100, 10);

        let report = Pruner::new(dir.path(), 500).prune().unwrap();
        assert_eq!(
            report,
            PruneReport {
                scanned: 1,
                deleted: 0,
                space_saved: 0,
                within_limit: true
            }
        );
    }

    #[test]
    fn evicts_least_recently_used_until_under_bound() {
        let dir = tempfile::tempdir().unwrap();
        // Ascending access time: the 800-byte entry is the oldest.
        let oldest = write_entry(dir.path(), COMMITS[0], 800, 300);
        let middle = write_entry(dir.path(), COMMITS[1], 300, 200);
        let newest = write_entry(dir.path(), COMMITS[2], 200, 100);

        let report = Pruner::new(dir.path(), 500).prune().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.space_saved, 800);
        assert!(report.within_limit);

        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = write_entry(dir.path(), COMMITS[0], 800, 300);
        write_entry(dir.path(), COMMITS[1], 300, 200);

        let report = Pruner::new(dir.path(), 500).dry_run(true).prune().unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.space_saved, 800);
        assert!(oldest.exists(), "dry run must not delete");
    }

    #[test]
    fn ignores_foreign_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("not-an-artifact")).unwrap();
        fs::create_dir_all(dir.path().join("0123-linux-x64")).unwrap(); // short commit

        let report = Pruner::new(dir.path(), 500).prune().unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[test]
    fn missing_tarball_subtree_is_empty() {
        let report = Pruner::new("/nonexistent/tarballs", 500).prune().unwrap();
        assert_eq!(report.scanned, 0);
        assert!(report.within_limit);
    }

    #[test]
    fn recognizes_artifact_names() {
        assert!(is_artifact_dir_name(
            "0123456789abcdef0123456789abcdef01234567-linux-x64"
        ));
        assert!(!is_artifact_dir_name("0123-linux-x64"));
        assert!(!is_artifact_dir_name(
            "0123456789ABCDEF0123456789ABCDEF01234567-linux-x64"
        ));
        assert!(!is_artifact_dir_name(
            "0123456789abcdef0123456789abcdef01234567"
        ));
    }
}
