use std::path::Path;

use futures::StreamExt;
use tracing::{debug, warn};

use gitcache_git::RefResolver;
use gitcache_lockfile::{scan_lockfile, GitDependency};
use gitcache_urls::{canonicalize, extract_ref, PackageId};

use crate::hierarchy::CacheHierarchy;
use crate::locks::Locks;
use crate::DispatchError;

/// How many dependencies are staged at once.
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Rebuild from the Git origin even when a cache tier has the bytes.
    pub force: bool,
    pub concurrency: usize,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Per-dependency result of a prepare run; failures never abort the batch.
#[derive(Debug, Clone)]
pub struct DependencyOutcome {
    pub name: String,
    /// `None` when the dependency never became buildable (unresolved ref
    /// or malformed key).
    pub package_id: Option<String>,
    pub error: Option<String>,
}

impl DependencyOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate accounting of a prepare run.
#[derive(Debug, Default)]
pub struct PrepareReport {
    /// Git-sourced dependencies found in the lockfile.
    pub scanned: usize,
    /// Dependencies whose symbolic ref could not be resolved.
    pub unresolved: usize,
    pub outcomes: Vec<DependencyOutcome>,
}

impl PrepareReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    /// The batch succeeds when something was staged or there was nothing
    /// to stage.
    pub fn is_success(&self) -> bool {
        let attempted = self
            .outcomes
            .iter()
            .filter(|o| o.package_id.is_some())
            .count();
        attempted == 0 || self.succeeded() > 0
    }
}

/// The dependency acceleration pipeline: scan, resolve, then stage every
/// buildable dependency through the cache hierarchy concurrently.
pub struct Preparer {
    resolver: RefResolver,
    hierarchy: CacheHierarchy,
    locks: Locks,
}

impl Preparer {
    pub fn new(resolver: RefResolver, hierarchy: CacheHierarchy) -> Self {
        Self {
            resolver,
            hierarchy,
            locks: Locks::default(),
        }
    }

    pub fn hierarchy(&self) -> &CacheHierarchy {
        &self.hierarchy
    }

    /// Accelerate every Git dependency of a lockfile.
    ///
    /// Scan precedes resolve precedes staging; across dependencies there
    /// is no ordering, and each failure is isolated to its record.
    pub async fn prepare(
        &self,
        lockfile: &Path,
        options: &PrepareOptions,
    ) -> Result<PrepareReport, DispatchError> {
        let scan = scan_lockfile(lockfile)?;
        if !scan.has_git {
            debug!("No Git dependencies in {}", lockfile.display());
            return Ok(PrepareReport::default());
        }

        let resolved = self.resolver.resolve_all(scan.dependencies).await;
        let mut report = PrepareReport {
            scanned: resolved.dependencies.len(),
            unresolved: resolved.failures,
            ..PrepareReport::default()
        };

        let (buildable, unresolved): (Vec<_>, Vec<_>) = resolved
            .dependencies
            .into_iter()
            .partition(|dep| dep.resolved_commit.is_some());

        for dep in unresolved {
            report.outcomes.push(DependencyOutcome {
                error: Some(format!("could not resolve ref `{}`", dep.reference)),
                name: dep.name,
                package_id: None,
            });
        }

        let staged: Vec<DependencyOutcome> = futures::stream::iter(
            buildable
                .into_iter()
                .map(|dep| self.stage_dependency(dep, options)),
        )
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
        report.outcomes.extend(staged);

        Ok(report)
    }

    /// Prime the cache for a single repository outside any lockfile.
    pub async fn prime(
        &self,
        repo: &str,
        reference: Option<&str>,
        force: bool,
    ) -> Result<PackageId, DispatchError> {
        let url = canonicalize(repo);
        let reference = match reference {
            Some(reference) => reference.to_string(),
            None => extract_ref(&url).to_string(),
        };
        let commit = if is_full_commit(&reference) {
            reference
        } else {
            self.resolver.resolve(&url, &reference).await?
        };

        let package_id = PackageId::new(&url, &commit)?;
        let lock = self.locks.acquire(package_id.as_str()).await;
        let _guard = lock.lock().await;
        if force {
            self.hierarchy.refresh(&package_id).await?;
        } else {
            self.hierarchy.get(&package_id).await?;
        }
        Ok(package_id)
    }

    async fn stage_dependency(
        &self,
        dep: GitDependency,
        options: &PrepareOptions,
    ) -> DependencyOutcome {
        let commit = dep
            .resolved_commit
            .as_deref()
            .expect("only resolved dependencies are staged");
        let package_id = match PackageId::new(&dep.preferred_url, commit) {
            Ok(package_id) => package_id,
            Err(err) => {
                warn!("Skipping {}: {err}", dep.name);
                return DependencyOutcome {
                    name: dep.name,
                    package_id: None,
                    error: Some(err.to_string()),
                };
            }
        };

        // Same-key racers serialize here; the loser takes the winner's
        // artifact via the fast path.
        let lock = self.locks.acquire(package_id.as_str()).await;
        let _guard = lock.lock().await;

        let result = if options.force {
            self.hierarchy.refresh(&package_id).await
        } else {
            self.hierarchy.get(&package_id).await
        };

        match result {
            Ok(_) => DependencyOutcome {
                name: dep.name,
                package_id: Some(package_id.to_string()),
                error: None,
            },
            Err(err) => {
                warn!("Failed to stage {}: {err}", dep.name);
                DependencyOutcome {
                    name: dep.name,
                    package_id: Some(package_id.to_string()),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn is_full_commit(value: &str) -> bool {
    value.len() == 40
        && value
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
