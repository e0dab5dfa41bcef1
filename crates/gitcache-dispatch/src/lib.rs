//! Composition of the three cache tiers (local content store, cloud
//! registry, Git origin) and the pipeline that accelerates a lockfile's
//! Git dependencies through them.

use thiserror::Error;

pub use crate::hierarchy::{CacheHierarchy, TierStatus};
pub use crate::pipeline::{DependencyOutcome, PrepareOptions, PrepareReport, Preparer};
pub use crate::strategy::{CacheStrategy, GitStrategy, LocalStrategy, RegistryStrategy};

mod hierarchy;
mod locks;
mod pipeline;
mod strategy;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every tier was consulted and none produced the artifact.
    #[error("artifact `{0}` was not found in any cache tier")]
    NotFound(String),

    #[error(transparent)]
    Scan(#[from] gitcache_lockfile::ScanError),

    #[error(transparent)]
    PackageId(#[from] gitcache_urls::PackageIdError),

    #[error(transparent)]
    Registry(#[from] gitcache_client::Error),

    #[error(transparent)]
    Git(#[from] gitcache_git::GitError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
