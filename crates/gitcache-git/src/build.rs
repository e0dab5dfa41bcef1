use std::io;
use std::path::{Path, PathBuf};

use base64::prelude::{Engine, BASE64_STANDARD};
use fs_err as fs;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use gitcache_cache::{
    platform_tag, read_artifact, ArtifactMetadata, Cache, PackageInfo, METADATA_NAME, TARBALL_NAME,
};
use gitcache_urls::bare_url;

use crate::process::{run_tool, PROCESS_TIMEOUT};
use crate::resolve::is_full_commit;
use crate::GitError;

/// Fallback when `npm pack` prints nothing usable.
const DEFAULT_PACK_FILENAME: &str = "package.tgz";

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild even when a complete artifact exists.
    pub force: bool,
    /// Pass the host's ignore-scripts flag to installs and skip the
    /// prepare hook.
    pub skip_build_scripts: bool,
    /// Build for this platform tag instead of the host's.
    pub platform: Option<String>,
}

/// A built (or cache-resident) tarball artifact.
#[derive(Debug, Clone)]
pub struct TarballArtifact {
    pub dir: PathBuf,
    pub tarball_path: PathBuf,
    pub metadata: ArtifactMetadata,
}

/// Builds reproducible package tarballs from Git commits.
///
/// One artifact per `(commit, platform)`; a completed artifact is never
/// rebuilt unless forced. The builder performs no cross-key locking; two
/// racers on the same key are safe because `metadata.json` is written only
/// after `package.tgz` is in place, and a racer that observes the complete
/// pair short-circuits to the fast path.
#[derive(Debug)]
pub struct TarballBuilder {
    cache: Cache,
    git: PathBuf,
    npm: PathBuf,
}

impl TarballBuilder {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            git: crate::find_tool("git"),
            npm: crate::find_tool("npm"),
        }
    }

    /// Produce the artifact for `(commit, platform)`, from cache when
    /// possible.
    #[instrument(skip(self, options))]
    pub async fn build(
        &self,
        git_url: &str,
        commit: &str,
        options: &BuildOptions,
    ) -> Result<TarballArtifact, GitError> {
        if !is_full_commit(commit) {
            return Err(GitError::MalformedCommit(commit.to_string()));
        }
        let platform = options
            .platform
            .clone()
            .unwrap_or_else(platform_tag);
        let dir = self.cache.artifact_dir(commit, &platform);

        if !options.force {
            if let Some(metadata) = read_artifact(&dir)? {
                debug!("Using cached tarball for {commit}");
                return Ok(TarballArtifact {
                    tarball_path: dir.join(TARBALL_NAME),
                    dir,
                    metadata,
                });
            }
        }

        // Scoped working directory: dropped (and deleted) on every exit,
        // including cancellation.
        let workdir = tempfile::tempdir()?;
        let work = workdir.path();
        let remote = bare_url(git_url);

        self.checkout(remote, commit, work).await?;
        self.install(remote, options.skip_build_scripts, work).await?;

        let manifest = read_manifest(work);
        if !options.skip_build_scripts && declares_prepare_script(manifest.as_ref()) {
            run_tool(&self.npm, &["run", "prepare"], work, PROCESS_TIMEOUT)
                .await
                .map_err(|err| GitError::Install(remote.to_string(), Box::new(err)))?;
        }

        let pack = run_tool(&self.npm, &["pack"], work, PROCESS_TIMEOUT)
            .await
            .map_err(|err| GitError::Pack(remote.to_string(), Box::new(err)))?;
        let packed = work.join(pack_filename(&pack.stdout));
        if !packed.is_file() {
            return Err(GitError::Pack(
                remote.to_string(),
                Box::new(GitError::Command {
                    message: format!("`npm pack` did not produce {}", packed.display()),
                    stdout: pack.stdout,
                    stderr: String::new(),
                }),
            ));
        }

        // A racer may have completed the same key while we were building;
        // its artifact is as good as ours.
        if !options.force {
            if let Some(metadata) = read_artifact(&dir)? {
                debug!("Artifact for {commit} appeared during build");
                return Ok(TarballArtifact {
                    tarball_path: dir.join(TARBALL_NAME),
                    dir,
                    metadata,
                });
            }
        }

        fs::create_dir_all(&dir)?;
        let tarball_path = dir.join(TARBALL_NAME);
        move_into_place(&packed, &tarball_path)?;

        let bytes = fs::tokio::read(&tarball_path).await?;
        let metadata = ArtifactMetadata {
            git_url: git_url.to_string(),
            commit: commit.to_string(),
            platform: Some(platform),
            integrity: integrity(&bytes),
            build_time: jiff::Timestamp::now(),
            package_info: package_info(manifest.as_ref()),
        };

        // Written last: readers that can parse metadata.json may trust the
        // tarball beside it.
        fs::write(dir.join(METADATA_NAME), serde_json::to_vec_pretty(&metadata)?)?;

        debug!("Built tarball for {commit}");
        Ok(TarballArtifact {
            tarball_path,
            dir,
            metadata,
        })
    }

    /// Shallow-clone and materialize the commit, deepening only when the
    /// commit is not reachable at depth 1.
    async fn checkout(&self, remote: &str, commit: &str, work: &Path) -> Result<(), GitError> {
        let wrap = |err: GitError| GitError::Checkout {
            url: remote.to_string(),
            commit: commit.to_string(),
            source: Box::new(err),
        };

        run_tool(
            &self.git,
            &["clone", "--depth", "1", remote, "."],
            work,
            PROCESS_TIMEOUT,
        )
        .await
        .map_err(wrap)?;

        let probe = format!("{commit}^{{commit}}");
        if run_tool(&self.git, &["cat-file", "-e", &probe], work, PROCESS_TIMEOUT)
            .await
            .is_err()
        {
            run_tool(
                &self.git,
                &["fetch", "--unshallow", "origin"],
                work,
                PROCESS_TIMEOUT,
            )
            .await
            .map_err(wrap)?;
        }

        run_tool(&self.git, &["checkout", commit], work, PROCESS_TIMEOUT)
            .await
            .map_err(wrap)?;
        Ok(())
    }

    /// `npm ci`, falling back to `npm install` for projects whose lockfile
    /// is out of sync.
    async fn install(&self, remote: &str, skip_scripts: bool, work: &Path) -> Result<(), GitError> {
        let mut ci_args = vec!["ci"];
        let mut install_args = vec!["install"];
        if skip_scripts {
            ci_args.push("--ignore-scripts");
            install_args.push("--ignore-scripts");
        }

        if let Err(ci_err) = run_tool(&self.npm, &ci_args, work, PROCESS_TIMEOUT).await {
            debug!("`npm ci` failed for {remote}, retrying with `npm install`: {ci_err}");
            run_tool(&self.npm, &install_args, work, PROCESS_TIMEOUT)
                .await
                .map_err(|err| GitError::Install(remote.to_string(), Box::new(err)))?;
        }
        Ok(())
    }
}

/// The packed filename is the last non-empty line of `npm pack` stdout.
fn pack_filename(stdout: &str) -> &str {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(DEFAULT_PACK_FILENAME)
}

/// `"sha256-" + base64(sha256(bytes))`, the form downstream verifiers
/// consume.
pub(crate) fn integrity(bytes: &[u8]) -> String {
    format!("sha256-{}", BASE64_STANDARD.encode(Sha256::digest(bytes)))
}

/// Rename into the cache directory; fall back to copy-then-rename when the
/// temp dir lives on another filesystem.
fn move_into_place(from: &Path, to: &Path) -> Result<(), io::Error> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let staging = to.with_extension("tmp");
    fs::copy(from, &staging)?;
    fs::rename(&staging, to)?;
    let _ = fs::remove_file(from);
    Ok(())
}

fn read_manifest(work: &Path) -> Option<serde_json::Value> {
    let contents = fs::read(work.join("package.json")).ok()?;
    serde_json::from_slice(&contents).ok()
}

fn declares_prepare_script(manifest: Option<&serde_json::Value>) -> bool {
    manifest
        .and_then(|manifest| manifest.get("scripts"))
        .and_then(|scripts| scripts.get("prepare"))
        .is_some()
}

fn package_info(manifest: Option<&serde_json::Value>) -> Option<PackageInfo> {
    let manifest = manifest?;
    Some(PackageInfo {
        name: manifest.get("name")?.as_str()?.to_string(),
        version: manifest.get("version")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    fn builder_without_tools(root: &Path) -> TarballBuilder {
        // Tools that cannot exist: any network or process step fails
        // loudly, proving which paths were taken.
        TarballBuilder {
            cache: Cache::from_path(root),
            git: PathBuf::from("/nonexistent/git"),
            npm: PathBuf::from("/nonexistent/npm"),
        }
    }

    fn seed_artifact(cache: &Cache, commit: &str, platform: &str) -> ArtifactMetadata {
        let dir = cache.artifact_dir(commit, platform);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(TARBALL_NAME), b"tarball").unwrap();
        let metadata = ArtifactMetadata {
            git_url: "git+https://github.com/chalk/chalk.git".to_string(),
            commit: commit.to_string(),
            platform: Some(platform.to_string()),
            integrity: integrity(b"tarball"),
            build_time: "2024-01-02T03:04:05Z".parse().unwrap(),
            package_info: None,
        };
        fs::write(
            dir.join(METADATA_NAME),
            serde_json::to_vec_pretty(&metadata).unwrap(),
        )
        .unwrap();
        metadata
    }

    #[tokio::test]
    async fn fast_path_returns_stored_record_without_rebuilding() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_without_tools(dir.path());
        let seeded = seed_artifact(&builder.cache, COMMIT, &platform_tag());

        let artifact = builder
            .build("git+https://github.com/chalk/chalk.git", COMMIT, &BuildOptions::default())
            .await
            .unwrap();

        // Same buildTime as stored: the fast path did not rebuild.
        assert_eq!(artifact.metadata.build_time, seeded.build_time);
        assert!(artifact.tarball_path.ends_with(TARBALL_NAME));
    }

    #[tokio::test]
    async fn force_skips_the_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_without_tools(dir.path());
        seed_artifact(&builder.cache, COMMIT, &platform_tag());

        let options = BuildOptions {
            force: true,
            ..BuildOptions::default()
        };
        let err = builder
            .build("git+https://github.com/chalk/chalk.git", COMMIT, &options)
            .await
            .unwrap_err();
        // With force, the builder went for git (and failed to spawn it).
        assert!(matches!(err, GitError::Checkout { .. }));
    }

    #[tokio::test]
    async fn incomplete_artifact_is_not_a_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_without_tools(dir.path());
        let artifact_dir = builder.cache.artifact_dir(COMMIT, &platform_tag());
        fs::create_dir_all(&artifact_dir).unwrap();
        fs::write(artifact_dir.join(TARBALL_NAME), b"tarball").unwrap();
        // No metadata.json: the pair is incomplete, so the builder must
        // attempt a real build.
        let err = builder
            .build("git+https://github.com/chalk/chalk.git", COMMIT, &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Checkout { .. }));
    }

    #[tokio::test]
    async fn rejects_partial_commits() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_without_tools(dir.path());
        let err = builder
            .build("git+https://github.com/chalk/chalk.git", "abc123", &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::MalformedCommit(_)));
    }

    #[test]
    fn integrity_has_the_sri_form() {
        // sha256 of the empty input, base64-encoded.
        assert_eq!(integrity(b""), "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
        assert!(integrity(b"tarball").starts_with("sha256-"));
    }

    #[test]
    fn pack_filename_is_the_last_non_empty_line() {
        assert_eq!(
            pack_filename("npm notice tarball details\nchalk-5.0.0.tgz\n\n"),
            "chalk-5.0.0.tgz"
        );
        assert_eq!(pack_filename(""), DEFAULT_PACK_FILENAME);
        assert_eq!(pack_filename("\n \n"), DEFAULT_PACK_FILENAME);
    }

    #[test]
    fn detects_prepare_scripts() {
        let with: serde_json::Value =
            serde_json::json!({ "scripts": { "prepare": "tsc" } });
        let without: serde_json::Value = serde_json::json!({ "scripts": {} });
        assert!(declares_prepare_script(Some(&with)));
        assert!(!declares_prepare_script(Some(&without)));
        assert!(!declares_prepare_script(None));
    }
}
