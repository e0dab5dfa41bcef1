use std::io::Write;
use std::path::PathBuf;

use futures::future;
use tracing::{debug, warn};

use gitcache_lockfile::GitDependency;
use gitcache_urls::bare_url;

use crate::process::{run_tool, PROCESS_TIMEOUT};
use crate::GitError;

/// The outcome of resolving a batch of dependencies.
#[derive(Debug)]
pub struct ResolvedDependencies {
    /// Every input dependency, in input order; unresolved ones keep
    /// `resolved_commit = None`.
    pub dependencies: Vec<GitDependency>,
    pub failures: usize,
}

impl ResolvedDependencies {
    /// The dependencies a build can actually be attempted for.
    pub fn buildable(&self) -> impl Iterator<Item = &GitDependency> {
        self.dependencies
            .iter()
            .filter(|dep| dep.resolved_commit.is_some())
    }
}

/// Maps symbolic refs to commits via `git ls-remote`.
#[derive(Debug)]
pub struct RefResolver {
    git: PathBuf,
    /// Append-only audit log; write failures never fail a resolution.
    log_path: Option<PathBuf>,
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RefResolver {
    pub fn new() -> Self {
        Self {
            git: crate::find_tool("git"),
            log_path: None,
        }
    }

    #[must_use]
    pub fn with_log(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    /// Resolve one symbolic ref to a 40-hex commit.
    pub async fn resolve(&self, url: &str, reference: &str) -> Result<String, GitError> {
        let remote = bare_url(url);
        let commit = match self.list_remote(remote, reference).await? {
            Some(commit) => commit,
            // An unknown ref falls back to the remote's default branch,
            // once.
            None if reference != "HEAD" => {
                debug!("Ref `{reference}` not found on {remote}, falling back to HEAD");
                self.list_remote(remote, "HEAD")
                    .await?
                    .ok_or_else(|| GitError::RefResolution {
                        url: remote.to_string(),
                        reference: reference.to_string(),
                    })?
            }
            None => {
                return Err(GitError::RefResolution {
                    url: remote.to_string(),
                    reference: reference.to_string(),
                })
            }
        };

        if !is_full_commit(&commit) {
            return Err(GitError::MalformedCommit(commit));
        }
        self.append_log(remote, reference, &commit);
        Ok(commit)
    }

    /// Resolve a whole scan concurrently.
    ///
    /// Dependencies whose reference is already a full commit never touch
    /// the network; per-dependency failures are diagnostics, not errors.
    pub async fn resolve_all(&self, dependencies: Vec<GitDependency>) -> ResolvedDependencies {
        let resolved = future::join_all(dependencies.into_iter().map(|mut dep| async {
            if dep.has_literal_commit() {
                dep.resolved_commit = Some(dep.reference.clone());
                return dep;
            }
            match self.resolve(&dep.preferred_url, &dep.reference).await {
                Ok(commit) => dep.resolved_commit = Some(commit),
                Err(err) => {
                    warn!("Could not resolve {} ({}): {err}", dep.name, dep.reference);
                }
            }
            dep
        }))
        .await;

        let failures = resolved
            .iter()
            .filter(|dep| dep.resolved_commit.is_none())
            .count();
        ResolvedDependencies {
            dependencies: resolved,
            failures,
        }
    }

    /// One `git ls-remote <url> <ref>` listing; `None` when the listing is
    /// empty.
    async fn list_remote(&self, remote: &str, reference: &str) -> Result<Option<String>, GitError> {
        let cwd = std::env::temp_dir();
        let output = run_tool(
            &self.git,
            &["ls-remote", remote, reference],
            &cwd,
            PROCESS_TIMEOUT,
        )
        .await?;
        Ok(parse_ls_remote(&output.stdout))
    }

    fn append_log(&self, url: &str, reference: &str, commit: &str) {
        let Some(path) = &self.log_path else { return };
        let result = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                writeln!(
                    file,
                    "{url}\t{reference}\t{commit}\t{}",
                    jiff::Timestamp::now()
                )
            });
        if let Err(err) = result {
            debug!("Could not append to ref log: {err}");
        }
    }
}

/// The leading token of the first listing line, before the tab.
fn parse_ls_remote(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|line| !line.trim().is_empty())?;
    let commit = line.split('\t').next()?.trim();
    if commit.is_empty() {
        None
    } else {
        Some(commit.to_string())
    }
}

pub(crate) fn is_full_commit(value: &str) -> bool {
    value.len() == 40
        && value
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_listing_line() {
        let stdout = "def456def456def456def456def456def456def4\tHEAD\n\
                      0000000000000000000000000000000000000000\trefs/heads/main";
        assert_eq!(
            parse_ls_remote(stdout),
            Some("def456def456def456def456def456def456def4".to_string())
        );
    }

    #[test]
    fn empty_listing_is_none() {
        assert_eq!(parse_ls_remote(""), None);
        assert_eq!(parse_ls_remote("\n\n"), None);
    }

    #[test]
    fn validates_full_commits() {
        assert!(is_full_commit("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_full_commit("0123abc"));
        assert!(!is_full_commit("0123456789ABCDEF0123456789ABCDEF01234567"));
        assert!(!is_full_commit("zz23456789abcdef0123456789abcdef01234567"));
    }

    /// A stand-in `git` that only answers `ls-remote <url> HEAD`.
    #[cfg(unix)]
    fn stub_git(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("git");
        fs_err::write(
            &path,
            "#!/bin/sh\n\
             if [ \"$3\" = \"HEAD\" ]; then\n\
               printf 'def456def456def456def456def456def456def4\\tHEAD\\n'\n\
             fi\n",
        )
        .unwrap();
        let mut perms = fs_err::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_ref_falls_back_to_head() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = RefResolver {
            git: stub_git(dir.path()),
            log_path: Some(dir.path().join("refs.log")),
        };

        let commit = resolver
            .resolve("git+https://github.com/test/repo.git", "nonexistent")
            .await
            .unwrap();
        assert_eq!(commit, "def456def456def456def456def456def456def4");

        // The resolution was audited.
        let log = fs_err::read_to_string(dir.path().join("refs.log")).unwrap();
        assert!(log.contains("nonexistent"));
        assert!(log.contains(&commit));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_head_listing_fails_resolution() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("git");
        fs_err::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = fs_err::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&path, perms).unwrap();

        let resolver = RefResolver {
            git: path,
            log_path: None,
        };
        let err = resolver
            .resolve("https://github.com/test/repo.git", "main")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::RefResolution { .. }));
    }

    #[tokio::test]
    async fn literal_commits_bypass_the_network() {
        // A resolver pointed at a nonexistent git binary: any remote
        // listing would fail loudly.
        let resolver = RefResolver {
            git: PathBuf::from("/nonexistent/git"),
            log_path: None,
        };
        let dep = GitDependency {
            name: "chalk".to_string(),
            manifest_url: None,
            lockfile_url: "git+https://github.com/chalk/chalk.git#0123456789abcdef0123456789abcdef01234567".to_string(),
            preferred_url: "git+https://github.com/chalk/chalk.git#0123456789abcdef0123456789abcdef01234567".to_string(),
            reference: "0123456789abcdef0123456789abcdef01234567".to_string(),
            resolved_commit: None,
            integrity: None,
        };

        let resolved = resolver.resolve_all(vec![dep]).await;
        assert_eq!(resolved.failures, 0);
        assert_eq!(
            resolved.dependencies[0].resolved_commit.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
    }

    #[tokio::test]
    async fn resolution_failure_is_not_fatal() {
        let resolver = RefResolver {
            git: PathBuf::from("/nonexistent/git"),
            log_path: None,
        };
        let dep = GitDependency {
            name: "chalk".to_string(),
            manifest_url: None,
            lockfile_url: "git+https://github.com/chalk/chalk.git#main".to_string(),
            preferred_url: "git+https://github.com/chalk/chalk.git#main".to_string(),
            reference: "main".to_string(),
            resolved_commit: None,
            integrity: None,
        };

        let resolved = resolver.resolve_all(vec![dep]).await;
        assert_eq!(resolved.failures, 1);
        assert!(resolved.dependencies[0].resolved_commit.is_none());
        assert_eq!(resolved.buildable().count(), 0);
    }
}
