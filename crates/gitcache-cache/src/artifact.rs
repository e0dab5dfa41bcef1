use std::io;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

/// File name of the packed tarball inside an artifact directory.
pub const TARBALL_NAME: &str = "package.tgz";

/// File name of the artifact metadata, written after the tarball.
pub const METADATA_NAME: &str = "metadata.json";

/// Name and version read from the packed project's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// The `metadata.json` half of a tarball artifact.
///
/// `metadata.json` is written only once `package.tgz` is in place, so a
/// reader that can deserialize this record may trust the tarball next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub git_url: String,
    pub commit: String,
    /// Absent in records written before platform keying; treated as the
    /// current platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub integrity: String,
    /// ISO 8601 build timestamp.
    pub build_time: jiff::Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_info: Option<PackageInfo>,
}

impl ArtifactMetadata {
    /// The platform this artifact was built for, defaulting to the host.
    pub fn platform_or_current(&self) -> String {
        self.platform.clone().unwrap_or_else(crate::platform_tag)
    }
}

/// Read a complete artifact from its directory.
///
/// Returns `Ok(None)` unless both `package.tgz` and `metadata.json` exist:
/// an artifact with either file missing is treated as absent, never as
/// partially present.
pub fn read_artifact(dir: &Path) -> Result<Option<ArtifactMetadata>, io::Error> {
    let tarball = dir.join(TARBALL_NAME);
    let metadata = dir.join(METADATA_NAME);
    if !tarball.is_file() || !metadata.is_file() {
        return Ok(None);
    }
    let contents = fs::read(metadata)?;
    match serde_json::from_slice(&contents) {
        Ok(record) => Ok(Some(record)),
        // A torn or foreign metadata file disqualifies the artifact.
        Err(err) => {
            tracing::warn!("Ignoring unreadable artifact metadata in {}: {err}", dir.display());
            Ok(None)
        }
    }
}
