use std::io;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

/// Default bound on the tarball subtree.
pub const DEFAULT_MAX_CACHE_SIZE: &str = "5GB";

/// Persisted settings (`config.json` at the cache root).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub max_cache_size: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE.to_string(),
        }
    }
}

impl CacheConfig {
    /// Load the config, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self, io::Error> {
        match fs::read(path) {
            Ok(contents) => serde_json::from_slice(&contents)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    pub fn store(&self, path: &Path) -> Result<(), io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)
    }
}
