use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use gitcache_cache::ContentCache;
use gitcache_client::RegistryClient;
use gitcache_git::{BuildOptions, TarballBuilder};
use gitcache_urls::PackageId;

use crate::DispatchError;

/// One tier of the cache hierarchy.
///
/// Dyn-compatible async: implementations return boxed futures so the
/// hierarchy can hold an ordered `Vec<Arc<dyn CacheStrategy>>`.
pub trait CacheStrategy: Send + Sync {
    /// Tier name for status output and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether the tier can currently serve requests at all (e.g. the
    /// registry without credentials is unavailable).
    fn available(&self) -> bool {
        true
    }

    /// Whether `store` does anything; the Git origin is read-through only.
    fn writable(&self) -> bool {
        true
    }

    fn has<'a>(&'a self, package_id: &'a PackageId) -> BoxFuture<'a, bool>;

    fn get<'a>(
        &'a self,
        package_id: &'a PackageId,
    ) -> BoxFuture<'a, Result<Vec<u8>, DispatchError>>;

    fn store<'a>(
        &'a self,
        package_id: &'a PackageId,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// Tier 1: the content-addressed store on local disk.
pub struct LocalStrategy {
    content: ContentCache,
}

impl LocalStrategy {
    pub fn new(content: ContentCache) -> Self {
        Self { content }
    }
}

impl CacheStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    fn has<'a>(&'a self, package_id: &'a PackageId) -> BoxFuture<'a, bool> {
        async move { self.content.has(package_id) }.boxed()
    }

    fn get<'a>(
        &'a self,
        package_id: &'a PackageId,
    ) -> BoxFuture<'a, Result<Vec<u8>, DispatchError>> {
        async move { Ok(self.content.get(package_id)?) }.boxed()
    }

    fn store<'a>(
        &'a self,
        package_id: &'a PackageId,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        async move { Ok(self.content.store(package_id, bytes)?) }.boxed()
    }
}

/// Tier 2: the cloud registry.
pub struct RegistryStrategy {
    client: RegistryClient,
}

impl RegistryStrategy {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

impl CacheStrategy for RegistryStrategy {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn available(&self) -> bool {
        self.client.is_authenticated()
    }

    fn has<'a>(&'a self, package_id: &'a PackageId) -> BoxFuture<'a, bool> {
        self.client.has(package_id).boxed()
    }

    fn get<'a>(
        &'a self,
        package_id: &'a PackageId,
    ) -> BoxFuture<'a, Result<Vec<u8>, DispatchError>> {
        async move { Ok(self.client.get(package_id).await?) }.boxed()
    }

    fn store<'a>(
        &'a self,
        package_id: &'a PackageId,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        // Uploads never block the pipeline; failures are logged inside.
        async move {
            self.client.upload_async(
                package_id.clone(),
                gitcache_cache::TARBALL_NAME.to_string(),
                bytes.to_vec(),
            );
            Ok(())
        }
        .boxed()
    }
}

/// Tier 3: build from the Git origin. Always claims to have the artifact;
/// the build itself is the probe.
pub struct GitStrategy {
    builder: Arc<TarballBuilder>,
    options: BuildOptions,
}

impl GitStrategy {
    pub fn new(builder: Arc<TarballBuilder>) -> Self {
        Self {
            builder,
            options: BuildOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }
}

impl CacheStrategy for GitStrategy {
    fn name(&self) -> &'static str {
        "git"
    }

    fn writable(&self) -> bool {
        false
    }

    fn has<'a>(&'a self, _package_id: &'a PackageId) -> BoxFuture<'a, bool> {
        async { true }.boxed()
    }

    fn get<'a>(
        &'a self,
        package_id: &'a PackageId,
    ) -> BoxFuture<'a, Result<Vec<u8>, DispatchError>> {
        async move {
            let artifact = self
                .builder
                .build(package_id.git_url(), package_id.commit(), &self.options)
                .await?;
            Ok(fs_err::tokio::read(&artifact.tarball_path).await?)
        }
        .boxed()
    }

    fn store<'a>(
        &'a self,
        _package_id: &'a PackageId,
        _bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        async { Ok(()) }.boxed()
    }
}
