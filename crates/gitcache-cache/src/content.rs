use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use gitcache_urls::PackageId;

/// Default bound on the content store.
pub const DEFAULT_CONTENT_CACHE_SIZE: u64 = 1 << 30; // 1 GiB

/// Sidecar record stored next to each `.cache` file.
///
/// Purely informational: losing or corrupting a `.meta` file never fails a
/// read or write of the bytes it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentMeta {
    package_id: String,
    size: u64,
    sha256: String,
    cached_at: jiff::Timestamp,
    access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_accessed: Option<jiff::Timestamp>,
}

/// Aggregate numbers for `status` output.
#[derive(Debug, Clone, Default)]
pub struct ContentStats {
    pub file_count: u64,
    pub total_bytes: u64,
    pub oldest: Option<SystemTime>,
    pub newest: Option<SystemTime>,
}

/// A content-addressed byte store.
///
/// Bytes are stored under `hex(sha256(package_id))`, sharded by the first
/// two hex characters: `<root>/<aa>/<hash>.cache`.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
    max_size: u64,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: DEFAULT_CONTENT_CACHE_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    fn data_path(&self, package_id: &PackageId) -> PathBuf {
        let hash = hex::encode(Sha256::digest(package_id.as_str().as_bytes()));
        self.root.join(&hash[..2]).join(format!("{hash}.cache"))
    }

    fn meta_path(&self, package_id: &PackageId) -> PathBuf {
        self.data_path(package_id).with_extension("meta")
    }

    pub fn has(&self, package_id: &PackageId) -> bool {
        self.data_path(package_id).is_file()
    }

    /// Read the cached bytes, bumping the access count best-effort.
    pub fn get(&self, package_id: &PackageId) -> Result<Vec<u8>, io::Error> {
        let bytes = fs::read(self.data_path(package_id))?;
        self.record_access(package_id);
        Ok(bytes)
    }

    /// Write bytes, then re-check the size bound.
    pub fn store(&self, package_id: &PackageId, bytes: &[u8]) -> Result<(), io::Error> {
        let data_path = self.data_path(package_id);
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&data_path, bytes)?;

        let meta = ContentMeta {
            package_id: package_id.to_string(),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            cached_at: jiff::Timestamp::now(),
            access_count: 0,
            last_accessed: None,
        };
        self.write_meta(package_id, &meta);

        self.enforce_size();
        Ok(())
    }

    /// Delete an entry. Succeeds iff the `.cache` file was deleted; the
    /// `.meta` sidecar is cleaned up opportunistically.
    pub fn remove(&self, package_id: &PackageId) -> Result<(), io::Error> {
        let _ = fs::remove_file(self.meta_path(package_id));
        fs::remove_file(self.data_path(package_id))
    }

    /// Remove the whole store.
    pub fn clear(&self) -> Result<crate::Removal, io::Error> {
        crate::rm_rf(&self.root)
    }

    /// Evict files by ascending mtime until the store fits its bound.
    ///
    /// Every per-file failure is logged and skipped; eviction is a
    /// maintenance pass, not a correctness requirement.
    pub fn enforce_size(&self) {
        let mut files = self.walk_files(".cache");
        let total: u64 = files.iter().map(|(_, size, _)| size).sum();
        if total <= self.max_size {
            return;
        }

        files.sort_by_key(|(_, _, mtime)| *mtime);
        let mut excess = total - self.max_size;
        for (path, size, _) in files {
            if excess == 0 {
                break;
            }
            debug!("Evicting {} from the content cache", path.display());
            let _ = fs::remove_file(path.with_extension("meta"));
            match fs::remove_file(&path) {
                Ok(()) => excess = excess.saturating_sub(size),
                Err(err) => warn!("Failed to evict {}: {err}", path.display()),
            }
        }
    }

    pub fn stats(&self) -> ContentStats {
        let files = self.walk_files(".cache");
        let mut stats = ContentStats {
            file_count: files.len() as u64,
            ..ContentStats::default()
        };
        for (_, size, mtime) in files {
            stats.total_bytes += size;
            stats.oldest = Some(stats.oldest.map_or(mtime, |oldest| oldest.min(mtime)));
            stats.newest = Some(stats.newest.map_or(mtime, |newest| newest.max(mtime)));
        }
        stats
    }

    /// All files under the root with the given extension, as
    /// `(path, size, mtime)`. Unreadable entries are skipped.
    fn walk_files(&self, suffix: &str) -> Vec<(PathBuf, u64, SystemTime)> {
        walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().to_string_lossy().ends_with(suffix)
            })
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                let mtime = metadata.modified().ok()?;
                Some((entry.into_path(), metadata.len(), mtime))
            })
            .collect()
    }

    fn record_access(&self, package_id: &PackageId) {
        let Some(mut meta) = self.read_meta(package_id) else {
            return;
        };
        meta.access_count += 1;
        meta.last_accessed = Some(jiff::Timestamp::now());
        self.write_meta(package_id, &meta);
    }

    fn read_meta(&self, package_id: &PackageId) -> Option<ContentMeta> {
        let contents = fs::read(self.meta_path(package_id)).ok()?;
        serde_json::from_slice(&contents).ok()
    }

    fn write_meta(&self, package_id: &PackageId, meta: &ContentMeta) {
        let Ok(contents) = serde_json::to_vec_pretty(meta) else {
            return;
        };
        if let Err(err) = fs::write(self.meta_path(package_id), contents) {
            debug!("Failed to write content cache metadata: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_id(n: u32) -> PackageId {
        PackageId::new(
            &format!("https://github.com/test/pkg{n}.git"),
            "0123456789abcdef0123456789abcdef01234567",
        )
        .unwrap()
    }

    #[test]
    fn stores_and_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        let id = package_id(1);

        assert!(!cache.has(&id));
        cache.store(&id, b"tarball bytes").unwrap();
        assert!(cache.has(&id));
        assert_eq!(cache.get(&id).unwrap(), b"tarball bytes");
    }

    #[test]
    fn layout_is_sharded_by_hash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        let id = package_id(2);
        cache.store(&id, b"x").unwrap();

        let hash = hex::encode(Sha256::digest(id.as_str().as_bytes()));
        let expected = dir.path().join(&hash[..2]).join(format!("{hash}.cache"));
        assert!(expected.is_file());
        assert!(expected.with_extension("meta").is_file());
    }

    #[test]
    fn get_bumps_access_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        let id = package_id(3);
        cache.store(&id, b"x").unwrap();

        cache.get(&id).unwrap();
        cache.get(&id).unwrap();

        let meta = cache.read_meta(&id).unwrap();
        assert_eq!(meta.access_count, 2);
        assert!(meta.last_accessed.is_some());
    }

    #[test]
    fn missing_meta_does_not_fail_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        let id = package_id(4);
        cache.store(&id, b"x").unwrap();
        fs::remove_file(cache.meta_path(&id)).unwrap();

        assert_eq!(cache.get(&id).unwrap(), b"x");
    }

    #[test]
    fn remove_deletes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        let id = package_id(5);
        cache.store(&id, b"x").unwrap();

        cache.remove(&id).unwrap();
        assert!(!cache.has(&id));
        assert!(!cache.meta_path(&id).exists());
        assert!(cache.remove(&id).is_err());
    }

    #[test]
    fn evicts_oldest_first_when_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).with_max_size(250);

        let old = package_id(6);
        let new = package_id(7);
        cache.store(&old, &[0u8; 200]).unwrap();

        // Backdate the first entry so eviction order is deterministic.
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        filetime::set_file_mtime(
            cache.data_path(&old),
            filetime::FileTime::from_system_time(past),
        )
        .unwrap();

        cache.store(&new, &[0u8; 200]).unwrap();

        assert!(!cache.has(&old), "oldest entry should have been evicted");
        assert!(cache.has(&new));
    }

    #[test]
    fn clear_removes_the_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("content");
        let cache = ContentCache::new(&root);
        cache.store(&package_id(10), b"x").unwrap();

        let removal = cache.clear().unwrap();
        assert!(removal.num_files >= 2);
        assert!(!root.exists());
    }

    #[test]
    fn stats_aggregate_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.store(&package_id(8), &[0u8; 100]).unwrap();
        cache.store(&package_id(9), &[0u8; 50]).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, 150);
        assert!(stats.oldest.is_some());
    }
}
