use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;

use gitcache_cache::{Cache, ContentCache};
use gitcache_client::{AuthManager, RegistryClient, RegistryClientBuilder};
use gitcache_dispatch::{CacheHierarchy, GitStrategy, LocalStrategy, Preparer, RegistryStrategy};
use gitcache_git::{BuildOptions, RefResolver, TarballBuilder};

pub(crate) use add::add;
pub(crate) use auth::{auth_login, auth_logout, auth_orgs, auth_setup_ci, auth_status};
pub(crate) use config::config;
pub(crate) use install::install;
pub(crate) use prepare::prepare;
pub(crate) use prune::prune;
pub(crate) use scan::scan;
pub(crate) use setup::setup;
pub(crate) use status::status;

mod add;
mod auth;
mod config;
mod install;
mod prepare;
mod prune;
mod scan;
mod setup;
mod status;

#[derive(Copy, Clone)]
pub(crate) enum ExitStatus {
    /// The command succeeded.
    Success,
    /// The command failed due to user input or a runtime error.
    Failure,
    /// The user interrupted the command.
    Interrupted,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::from(0),
            ExitStatus::Failure => ExitCode::from(1),
            ExitStatus::Interrupted => ExitCode::from(130),
        }
    }
}

/// Everything a command needs: the cache root, the registry session, and
/// the pieces composed from them.
pub(crate) struct Context {
    pub(crate) cache: Cache,
    pub(crate) auth: Arc<AuthManager>,
    pub(crate) client: RegistryClient,
}

impl Context {
    pub(crate) fn new(cache_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let cache = match cache_dir {
            Some(dir) => Cache::from_path(dir),
            None => Cache::from_home()?,
        };
        cache.init()?;

        let auth = Arc::new(AuthManager::new(cache.auth_file()));
        let client = RegistryClientBuilder::from_env()
            .auth(auth.clone())
            .verbose(verbose)
            .build();

        Ok(Self {
            cache,
            auth,
            client,
        })
    }

    pub(crate) fn content_cache(&self) -> ContentCache {
        ContentCache::new(self.cache.content())
    }

    /// The Local → Registry → Git pipeline with the given build options.
    pub(crate) fn preparer(&self, build_options: BuildOptions) -> Preparer {
        let builder = Arc::new(TarballBuilder::new(self.cache.clone()));
        let hierarchy = CacheHierarchy::new(vec![
            Arc::new(LocalStrategy::new(self.content_cache())),
            Arc::new(RegistryStrategy::new(self.client.clone())),
            Arc::new(GitStrategy::new(builder).with_options(build_options)),
        ]);
        let resolver = RefResolver::new().with_log(self.cache.refs_log());
        Preparer::new(resolver, hierarchy)
    }

    pub(crate) fn resolver(&self) -> RefResolver {
        RefResolver::new().with_log(self.cache.refs_log())
    }
}
