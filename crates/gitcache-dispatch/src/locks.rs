use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// In-process locks keyed by package id, so two tasks racing on the same
/// `(commit, platform)` serialize instead of both building.
#[derive(Debug, Default)]
pub(crate) struct Locks(Mutex<FxHashMap<String, Arc<Mutex<()>>>>);

impl Locks {
    pub(crate) async fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.0.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
