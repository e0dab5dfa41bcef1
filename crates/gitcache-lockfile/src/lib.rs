//! Scanning npm lockfiles for Git-sourced dependencies.
//!
//! Two schema generations are in the wild: v1 nests resolution state in a
//! recursive `dependencies` tree, v2+ keeps a flat `packages` map keyed by
//! install path. Both are scanned into the same [`GitDependency`] records.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use gitcache_urls::{extract_ref, is_git_url, preferred_url};

use crate::schema::{Manifest, PackageLock, V1Dependency};

mod schema;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("lockfile not found at {0}")]
    LockfileMissing(PathBuf),
    #[error("failed to parse lockfile at {0}")]
    LockfileMalformed(PathBuf, #[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One Git-sourced package occurrence in a lockfile.
///
/// Created by the scanner; only the ref resolver fills `resolved_commit`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitDependency {
    pub name: String,
    /// URL the project author wrote in `package.json`, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    /// URL npm resolved into the lockfile.
    pub lockfile_url: String,
    /// Canonical URL chosen by the manifest-over-lockfile policy.
    pub preferred_url: String,
    /// Symbolic ref: tag, branch, 40-hex commit, or `HEAD`.
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl GitDependency {
    /// A reference that is already a full commit needs no resolution.
    pub fn has_literal_commit(&self) -> bool {
        self.reference.len() == 40
            && self
                .reference
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }
}

/// The outcome of scanning one lockfile. Immutable after the scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockfileScanResult {
    pub schema_version: u32,
    pub dependencies: Vec<GitDependency>,
    pub has_git: bool,
}

/// Scan a lockfile for Git-sourced dependencies.
///
/// The sibling `package.json` is side-loaded for the author-written URLs;
/// a malformed manifest is a warning, a malformed lockfile is fatal.
pub fn scan_lockfile(path: &Path) -> Result<LockfileScanResult, ScanError> {
    let contents = match fs_err::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::LockfileMissing(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    let lock: PackageLock = serde_json::from_slice(&contents)
        .map_err(|err| ScanError::LockfileMalformed(path.to_path_buf(), err))?;

    let manifest = load_sibling_manifest(path);

    let schema_version = lock.lockfile_version.unwrap_or(1);
    let dependencies = if schema_version >= 2 {
        scan_v2(&lock, &manifest)
    } else {
        scan_v1(&lock, &manifest)
    };

    Ok(LockfileScanResult {
        schema_version,
        has_git: !dependencies.is_empty(),
        dependencies,
    })
}

/// The `{name -> version-spec}` pairs from `package.json` whose spec is a
/// Git URL, across all four dependency sections.
fn load_sibling_manifest(lockfile: &Path) -> Manifest {
    let path = lockfile
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("package.json");
    let Ok(contents) = fs_err::read(&path) else {
        return Manifest::default();
    };
    match serde_json::from_slice::<Manifest>(&contents) {
        Ok(manifest) => manifest,
        Err(err) => {
            tracing::warn!("Ignoring malformed manifest at {}: {err}", path.display());
            Manifest::default()
        }
    }
}

/// v1: recursive walk of the nested `dependencies` tree.
fn scan_v1(lock: &PackageLock, manifest: &Manifest) -> Vec<GitDependency> {
    fn walk(
        dependencies: &std::collections::BTreeMap<String, V1Dependency>,
        manifest: &Manifest,
        out: &mut Vec<GitDependency>,
    ) {
        for (name, dependency) in dependencies {
            if let Some(resolved) = &dependency.resolved {
                if is_git_url(resolved) {
                    out.push(emit(name, resolved, dependency.integrity.clone(), manifest));
                }
            }
            if let Some(nested) = &dependency.dependencies {
                walk(nested, manifest, out);
            }
        }
    }

    let mut out = Vec::new();
    if let Some(dependencies) = &lock.dependencies {
        walk(dependencies, manifest, &mut out);
    }
    out
}

/// v2+: flat `packages` map keyed by install path.
fn scan_v2(lock: &PackageLock, manifest: &Manifest) -> Vec<GitDependency> {
    let Some(packages) = &lock.packages else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (path, package) in packages {
        let Some(resolved) = &package.resolved else {
            continue;
        };
        if !is_git_url(resolved) {
            continue;
        }
        let Some(name) = package
            .name
            .as_deref()
            .or_else(|| name_from_install_path(path))
        else {
            continue;
        };
        out.push(emit(name, resolved, package.integrity.clone(), manifest));
    }
    out
}

fn emit(
    name: &str,
    lockfile_url: &str,
    integrity: Option<String>,
    manifest: &Manifest,
) -> GitDependency {
    let manifest_url = manifest.git_url_for(name);
    let reference = extract_ref(lockfile_url).to_string();
    GitDependency {
        name: name.to_string(),
        preferred_url: preferred_url(manifest_url.as_deref(), lockfile_url),
        manifest_url,
        lockfile_url: lockfile_url.to_string(),
        reference,
        resolved_commit: None,
        integrity,
    }
}

/// Derive a package name from `node_modules/(@scope/)?pkg`.
fn name_from_install_path(path: &str) -> Option<&str> {
    let (_, name) = path.rsplit_once("node_modules/")?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_project(lockfile: &str, manifest: Option<&str>) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("package-lock.json");
        fs_err::File::create(&lock_path)
            .unwrap()
            .write_all(lockfile.as_bytes())
            .unwrap();
        if let Some(manifest) = manifest {
            fs_err::write(dir.path().join("package.json"), manifest).unwrap();
        }
        (dir, lock_path)
    }

    #[test]
    fn missing_lockfile_is_a_distinct_error() {
        let err = scan_lockfile(Path::new("/nonexistent/package-lock.json")).unwrap_err();
        assert!(matches!(err, ScanError::LockfileMissing(_)));
    }

    #[test]
    fn malformed_lockfile_is_fatal() {
        let (_dir, path) = write_project("{not json", None);
        let err = scan_lockfile(&path).unwrap_err();
        assert!(matches!(err, ScanError::LockfileMalformed(..)));
    }

    #[test]
    fn v1_walks_nested_dependencies() {
        let lockfile = r#"{
            "lockfileVersion": 1,
            "dependencies": {
                "chalk": {
                    "resolved": "git+https://github.com/chalk/chalk.git#abc1234def",
                    "integrity": "sha512-top",
                    "dependencies": {
                        "nested-git": {
                            "resolved": "git+ssh://git@github.com/a/nested.git#v1.0.0"
                        },
                        "registry-dep": {
                            "resolved": "https://registry.npmjs.org/x/-/x-1.0.0.tgz"
                        }
                    }
                }
            }
        }"#;
        let (_dir, path) = write_project(lockfile, None);
        let result = scan_lockfile(&path).unwrap();

        assert_eq!(result.schema_version, 1);
        assert!(result.has_git);
        let names: Vec<_> = result
            .dependencies
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, ["chalk", "nested-git"]);
        assert_eq!(result.dependencies[0].reference, "abc1234def");
        assert_eq!(result.dependencies[0].integrity.as_deref(), Some("sha512-top"));
    }

    #[test]
    fn absent_version_defaults_to_v1() {
        let lockfile = r#"{
            "dependencies": {
                "chalk": { "resolved": "git+https://github.com/chalk/chalk.git#main" }
            }
        }"#;
        let (_dir, path) = write_project(lockfile, None);
        let result = scan_lockfile(&path).unwrap();
        assert_eq!(result.schema_version, 1);
        assert_eq!(result.dependencies.len(), 1);
    }

    #[test]
    fn v2_reads_flat_packages_and_derives_names() {
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "": { "name": "my-app" },
                "node_modules/@scope/pkg": {
                    "resolved": "git+https://gitlab.com/scope/pkg.git#v2.0.0"
                },
                "node_modules/plain": {
                    "name": "renamed-plain",
                    "resolved": "git://github.com/a/plain.git#deadbeef"
                },
                "node_modules/registry-only": {
                    "resolved": "https://registry.npmjs.org/r/-/r-1.0.0.tgz"
                }
            }
        }"#;
        let (_dir, path) = write_project(lockfile, None);
        let result = scan_lockfile(&path).unwrap();

        assert_eq!(result.schema_version, 2);
        let names: Vec<_> = result
            .dependencies
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, ["@scope/pkg", "renamed-plain"]);
    }

    #[test]
    fn repairs_npm_ssh_rewrite_from_manifest() {
        // npm v7+ rewrote the author's HTTPS URL to SSH in the lockfile.
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "node_modules/lodash": {
                    "resolved": "git+ssh://git@github.com/lodash/lodash.git#abc123abc123abc123abc123abc123abc123abc1"
                }
            }
        }"#;
        let manifest = r#"{
            "name": "my-app",
            "dependencies": {
                "lodash": "git+https://github.com/lodash/lodash.git#4.17.21"
            }
        }"#;
        let (_dir, path) = write_project(lockfile, Some(manifest));
        let result = scan_lockfile(&path).unwrap();

        let dep = &result.dependencies[0];
        assert_eq!(
            dep.preferred_url,
            "git+https://github.com/lodash/lodash.git#4.17.21"
        );
        assert_eq!(dep.reference, "abc123abc123abc123abc123abc123abc123abc1");
        assert!(dep.has_literal_commit());
        assert!(is_git_url(&dep.preferred_url));
    }

    #[test]
    fn shorthand_manifest_spec_is_canonicalized() {
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "node_modules/chalk": {
                    "resolved": "github:chalk/chalk#v5.0.0"
                }
            }
        }"#;
        let manifest = r#"{
            "dependencies": { "chalk": "github:chalk/chalk#v5.0.0" }
        }"#;
        let (_dir, path) = write_project(lockfile, Some(manifest));
        let result = scan_lockfile(&path).unwrap();

        assert_eq!(
            result.dependencies[0].preferred_url,
            "git+https://github.com/chalk/chalk.git#v5.0.0"
        );
    }

    #[test]
    fn malformed_manifest_is_only_a_warning() {
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "node_modules/chalk": {
                    "resolved": "git+https://github.com/chalk/chalk.git#v5.0.0"
                }
            }
        }"#;
        let (_dir, path) = write_project(lockfile, Some("{broken"));
        let result = scan_lockfile(&path).unwrap();
        assert_eq!(result.dependencies.len(), 1);
        assert_eq!(result.dependencies[0].manifest_url, None);
    }

    #[test]
    fn manifest_collects_all_four_sections() {
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "node_modules/a": { "resolved": "git+ssh://git@github.com/o/a.git#x1" },
                "node_modules/b": { "resolved": "git+ssh://git@github.com/o/b.git#x2" },
                "node_modules/c": { "resolved": "git+ssh://git@github.com/o/c.git#x3" },
                "node_modules/d": { "resolved": "git+ssh://git@github.com/o/d.git#x4" }
            }
        }"#;
        let manifest = r#"{
            "dependencies":         { "a": "git+https://github.com/o/a.git" },
            "devDependencies":      { "b": "git+https://github.com/o/b.git" },
            "optionalDependencies": { "c": "git+https://github.com/o/c.git" },
            "peerDependencies":     { "d": "git+https://github.com/o/d.git" }
        }"#;
        let (_dir, path) = write_project(lockfile, Some(manifest));
        let result = scan_lockfile(&path).unwrap();

        for dep in &result.dependencies {
            assert!(
                dep.preferred_url.starts_with("git+https://github.com/o/"),
                "{} did not take the manifest URL",
                dep.name
            );
        }
    }

    #[test]
    fn no_git_dependencies_sets_has_git_false() {
        let lockfile = r#"{
            "lockfileVersion": 2,
            "packages": {
                "node_modules/react": {
                    "resolved": "https://registry.npmjs.org/react/-/react-18.0.0.tgz"
                }
            }
        }"#;
        let (_dir, path) = write_project(lockfile, None);
        let result = scan_lockfile(&path).unwrap();
        assert!(!result.has_git);
        assert!(result.dependencies.is_empty());
    }
}
