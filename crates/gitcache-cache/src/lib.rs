//! On-disk layout of the gitcache cache, plus the pieces that manage it:
//! the content-addressed byte store and the LRU pruner.
//!
//! Everything lives under a single root (`~/.gitcache` by default):
//!
//! ```text
//! ~/.gitcache/
//! ├── auth.json                           registry session
//! ├── config.json                         persisted settings
//! ├── refs.log                            ref-resolution audit log
//! ├── tarballs/<commit>-<platform>/       built artifacts
//! │   ├── package.tgz
//! │   └── metadata.json
//! └── cache/<aa>/<hash>.cache (+ .meta)   content-addressed bytes
//! ```

use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;

pub use crate::artifact::{
    read_artifact, ArtifactMetadata, PackageInfo, METADATA_NAME, TARBALL_NAME,
};
pub use crate::config::{CacheConfig, DEFAULT_MAX_CACHE_SIZE};
pub use crate::content::{ContentCache, ContentStats, DEFAULT_CONTENT_CACHE_SIZE};
pub use crate::prune::{PruneError, PruneReport, Pruner};
pub use crate::removal::{rm_rf, Removal};
pub use crate::size::{format_size, parse_size, SizeError};

mod artifact;
mod config;
mod content;
mod prune;
mod removal;
mod size;

/// Directory name of the cache root under the user's home.
const CACHE_DIR_NAME: &str = ".gitcache";

/// The platform tag artifacts are keyed by: `<os>-<arch>`, lowercase.
///
/// Stable across invocations on the same host.
pub fn platform_tag() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// The root of the gitcache cache and the paths derived from it.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// The cache in the user's home directory.
    pub fn from_home() -> Result<Self, io::Error> {
        let home = home::home_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "could not determine home directory")
        })?;
        Ok(Self {
            root: home.join(CACHE_DIR_NAME),
        })
    }

    /// A cache rooted at an explicit path.
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root if needed and mark it ignorable by Git.
    pub fn init(&self) -> Result<(), io::Error> {
        fs::create_dir_all(&self.root)?;

        let gitignore = self.root.join(".gitignore");
        if !gitignore.exists() {
            let mut file = fs::File::create(gitignore)?;
            file.write_all(b"*")?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The subtree holding built tarball artifacts.
    pub fn tarballs(&self) -> PathBuf {
        self.root.join("tarballs")
    }

    /// The directory for one `(commit, platform)` artifact.
    pub fn artifact_dir(&self, commit: &str, platform: &str) -> PathBuf {
        self.tarballs().join(format!("{commit}-{platform}"))
    }

    /// The content-addressed byte store.
    pub fn content(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.root.join("auth.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Append-only audit log of ref resolutions.
    pub fn refs_log(&self) -> PathBuf {
        self.root.join("refs.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_tag_is_lowercase_hyphenated() {
        let tag = platform_tag();
        let (os, arch) = tag.split_once('-').unwrap();
        assert!(!os.is_empty());
        assert!(!arch.is_empty());
        assert_eq!(tag, tag.to_lowercase());
    }

    #[test]
    fn derives_layout_from_root() {
        let cache = Cache::from_path("/tmp/gc-test");
        assert_eq!(cache.tarballs(), Path::new("/tmp/gc-test/tarballs"));
        assert_eq!(
            cache.artifact_dir("abc123", "linux-x64"),
            Path::new("/tmp/gc-test/tarballs/abc123-linux-x64")
        );
        assert_eq!(cache.auth_file(), Path::new("/tmp/gc-test/auth.json"));
        assert_eq!(cache.refs_log(), Path::new("/tmp/gc-test/refs.log"));
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(dir.path().join("root"));
        cache.init().unwrap();
        cache.init().unwrap();
        assert!(cache.root().join(".gitignore").exists());
    }
}
