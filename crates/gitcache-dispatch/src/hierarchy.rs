use std::sync::Arc;

use tracing::{debug, warn};

use gitcache_urls::PackageId;

use crate::strategy::CacheStrategy;
use crate::DispatchError;

/// Availability snapshot of one tier, for `status` output.
#[derive(Debug, Clone)]
pub struct TierStatus {
    pub name: &'static str,
    pub available: bool,
    pub writable: bool,
}

/// An ordered composition of cache tiers.
///
/// Lookups walk the tiers in order and promote hits into every earlier
/// tier, so the next lookup stops sooner. A tier that errors is skipped,
/// never fatal; only exhausting all tiers fails a `get`.
pub struct CacheHierarchy {
    strategies: Vec<Arc<dyn CacheStrategy>>,
}

impl CacheHierarchy {
    /// Compose tiers in lookup order.
    pub fn new(strategies: Vec<Arc<dyn CacheStrategy>>) -> Self {
        Self { strategies }
    }

    /// `true` if any available tier holds the artifact.
    pub async fn has(&self, package_id: &PackageId) -> bool {
        for strategy in &self.strategies {
            if strategy.available() && strategy.has(package_id).await {
                return true;
            }
        }
        false
    }

    /// Walk the tiers for the artifact bytes, promoting on a hit.
    pub async fn get(&self, package_id: &PackageId) -> Result<Vec<u8>, DispatchError> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            if !strategy.available() {
                debug!("Tier `{}` unavailable, skipping", strategy.name());
                continue;
            }
            if !strategy.has(package_id).await {
                continue;
            }
            match strategy.get(package_id).await {
                Ok(bytes) => {
                    debug!("Tier `{}` hit for {package_id}", strategy.name());
                    self.promote(index, package_id, &bytes).await;
                    return Ok(bytes);
                }
                Err(err) => {
                    // A tier that claimed the artifact but cannot deliver
                    // it (e.g. an unissuable download URL) is a miss.
                    warn!(
                        "Tier `{}` failed to produce {package_id}: {err}",
                        strategy.name()
                    );
                }
            }
        }
        Err(DispatchError::NotFound(package_id.to_string()))
    }

    /// A forced refresh: skip straight to the origin tier, then write the
    /// result back through the earlier tiers.
    pub async fn refresh(&self, package_id: &PackageId) -> Result<Vec<u8>, DispatchError> {
        let Some(origin) = self.strategies.last() else {
            return Err(DispatchError::NotFound(package_id.to_string()));
        };
        let bytes = origin.get(package_id).await?;
        self.promote(self.strategies.len() - 1, package_id, &bytes)
            .await;
        Ok(bytes)
    }

    /// Write the artifact through every writable tier. Failures are
    /// logged; a partially-written hierarchy still serves.
    pub async fn store(&self, package_id: &PackageId, bytes: &[u8]) {
        for strategy in &self.strategies {
            if !strategy.writable() || !strategy.available() {
                continue;
            }
            if let Err(err) = strategy.store(package_id, bytes).await {
                warn!(
                    "Tier `{}` failed to store {package_id}: {err}",
                    strategy.name()
                );
            }
        }
    }

    pub fn status(&self) -> Vec<TierStatus> {
        self.strategies
            .iter()
            .map(|strategy| TierStatus {
                name: strategy.name(),
                available: strategy.available(),
                writable: strategy.writable(),
            })
            .collect()
    }

    /// Best-effort copy of a hit into every tier before the one that
    /// served it.
    async fn promote(&self, hit_index: usize, package_id: &PackageId, bytes: &[u8]) {
        for strategy in &self.strategies[..hit_index] {
            if !strategy.writable() || !strategy.available() {
                continue;
            }
            match strategy.store(package_id, bytes).await {
                Ok(()) => debug!("Promoted {package_id} into `{}`", strategy.name()),
                Err(err) => warn!(
                    "Failed to promote {package_id} into `{}`: {err}",
                    strategy.name()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::*;

    /// An in-memory tier that records its traffic.
    struct FakeTier {
        name: &'static str,
        available: bool,
        writable: bool,
        contents: Mutex<Option<Vec<u8>>>,
        gets: AtomicUsize,
        stores: AtomicUsize,
        fail_get: bool,
    }

    impl FakeTier {
        fn holding(name: &'static str, bytes: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                writable: true,
                contents: Mutex::new(Some(bytes.to_vec())),
                gets: AtomicUsize::new(0),
                stores: AtomicUsize::new(0),
                fail_get: false,
            })
        }

        fn empty(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                writable: true,
                contents: Mutex::new(None),
                gets: AtomicUsize::new(0),
                stores: AtomicUsize::new(0),
                fail_get: false,
            })
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                writable: true,
                contents: Mutex::new(Some(b"unreachable".to_vec())),
                gets: AtomicUsize::new(0),
                stores: AtomicUsize::new(0),
                fail_get: true,
            })
        }
    }

    impl CacheStrategy for FakeTier {
        fn name(&self) -> &'static str {
            self.name
        }

        fn available(&self) -> bool {
            self.available
        }

        fn writable(&self) -> bool {
            self.writable
        }

        fn has<'a>(&'a self, _: &'a PackageId) -> BoxFuture<'a, bool> {
            async move { self.contents.lock().unwrap().is_some() }.boxed()
        }

        fn get<'a>(&'a self, id: &'a PackageId) -> BoxFuture<'a, Result<Vec<u8>, DispatchError>> {
            async move {
                self.gets.fetch_add(1, Ordering::SeqCst);
                if self.fail_get {
                    return Err(DispatchError::NotFound(id.to_string()));
                }
                self.contents
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| DispatchError::NotFound(id.to_string()))
            }
            .boxed()
        }

        fn store<'a>(
            &'a self,
            _: &'a PackageId,
            bytes: &'a [u8],
        ) -> BoxFuture<'a, Result<(), DispatchError>> {
            async move {
                self.stores.fetch_add(1, Ordering::SeqCst);
                *self.contents.lock().unwrap() = Some(bytes.to_vec());
                Ok(())
            }
            .boxed()
        }
    }

    fn package_id() -> PackageId {
        PackageId::new(
            "https://github.com/chalk/chalk.git",
            "0123456789abcdef0123456789abcdef01234567",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_tier_hit_stops_the_walk() {
        let local = FakeTier::holding("local", b"bytes");
        let registry = FakeTier::holding("registry", b"bytes");
        let hierarchy = CacheHierarchy::new(vec![local.clone(), registry.clone()]);

        let bytes = hierarchy.get(&package_id()).await.unwrap();
        assert_eq!(bytes, b"bytes");
        assert_eq!(local.gets.load(Ordering::SeqCst), 1);
        assert_eq!(registry.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registry_hit_promotes_into_local_exactly_once() {
        let local = FakeTier::empty("local");
        let registry = FakeTier::holding("registry", b"remote bytes");
        let hierarchy = CacheHierarchy::new(vec![local.clone(), registry.clone()]);

        let bytes = hierarchy.get(&package_id()).await.unwrap();
        assert_eq!(bytes, b"remote bytes");
        assert_eq!(local.stores.load(Ordering::SeqCst), 1);
        assert!(hierarchy.has(&package_id()).await);

        // The promoted copy now serves without touching the registry
        // again.
        hierarchy.get(&package_id()).await.unwrap();
        assert_eq!(registry.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn erroring_tier_falls_through_to_the_next() {
        let local = FakeTier::empty("local");
        let registry = FakeTier::broken("registry");
        let git = FakeTier::holding("git", b"built bytes");
        let hierarchy = CacheHierarchy::new(vec![local.clone(), registry, git]);

        let bytes = hierarchy.get(&package_id()).await.unwrap();
        assert_eq!(bytes, b"built bytes");
        // The hit was promoted past the broken tier into local.
        assert_eq!(local.stores.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_tier_is_skipped() {
        let local = FakeTier::empty("local");
        let registry = Arc::new(FakeTier {
            name: "registry",
            available: false,
            writable: true,
            contents: Mutex::new(Some(b"should not serve".to_vec())),
            gets: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            fail_get: false,
        });
        let git = FakeTier::holding("git", b"built");
        let hierarchy = CacheHierarchy::new(vec![local, registry.clone(), git]);

        let bytes = hierarchy.get(&package_id()).await.unwrap();
        assert_eq!(bytes, b"built");
        assert_eq!(registry.gets.load(Ordering::SeqCst), 0);
        // Promotion also skips the unavailable tier.
        assert_eq!(registry.stores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_tiers_fail_with_not_found() {
        let hierarchy =
            CacheHierarchy::new(vec![FakeTier::empty("local"), FakeTier::empty("registry")]);
        let err = hierarchy.get(&package_id()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn store_writes_through_all_writable_tiers() {
        let local = FakeTier::empty("local");
        let registry = FakeTier::empty("registry");
        let hierarchy = CacheHierarchy::new(vec![local.clone(), registry.clone()]);

        hierarchy.store(&package_id(), b"fresh").await;
        assert_eq!(local.stores.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stores.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_reports_each_tier() {
        let hierarchy =
            CacheHierarchy::new(vec![FakeTier::empty("local"), FakeTier::empty("registry")]);
        let status = hierarchy.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "local");
        assert!(status[0].available);
    }
}
