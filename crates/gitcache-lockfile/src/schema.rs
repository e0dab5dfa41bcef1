//! Serde models for the two npm lockfile generations and the manifest.
//!
//! Maps are `BTreeMap` so a scan of the same inputs always emits in the
//! same order.

use std::collections::BTreeMap;

use serde::Deserialize;

use gitcache_urls::is_git_url;

#[derive(Debug, Deserialize)]
pub(crate) struct PackageLock {
    #[serde(rename = "lockfileVersion")]
    pub(crate) lockfile_version: Option<u32>,
    /// v1 tree.
    pub(crate) dependencies: Option<BTreeMap<String, V1Dependency>>,
    /// v2+ flat map keyed by install path.
    pub(crate) packages: Option<BTreeMap<String, V2Package>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V1Dependency {
    pub(crate) resolved: Option<String>,
    pub(crate) integrity: Option<String>,
    pub(crate) dependencies: Option<BTreeMap<String, V1Dependency>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V2Package {
    pub(crate) name: Option<String>,
    pub(crate) resolved: Option<String>,
    pub(crate) integrity: Option<String>,
}

/// The Git-sourced entries of a `package.json`, flattened across the four
/// dependency sections.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Manifest {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    peer_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// The author-written Git URL for a package, if any section declares
    /// one.
    pub(crate) fn git_url_for(&self, name: &str) -> Option<String> {
        [
            &self.dependencies,
            &self.dev_dependencies,
            &self.optional_dependencies,
            &self.peer_dependencies,
        ]
        .into_iter()
        .find_map(|section| section.get(name))
        .filter(|spec| is_git_url(spec))
        .cloned()
    }
}
