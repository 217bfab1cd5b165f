//! In-memory history store

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::HistoryStore;
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

type Key = (String, String, u32);

/// History store kept in process memory
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<Key, StoredRelease>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: impl IntoIterator<Item = StoredRelease>) -> Self {
        let records = releases
            .into_iter()
            .map(|r| (key(&r.namespace, &r.name, r.version), r))
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Every stored record across all releases
    pub async fn all(&self) -> Vec<StoredRelease> {
        self.records.read().await.values().cloned().collect()
    }
}

fn key(namespace: &str, name: &str, version: u32) -> Key {
    (namespace.to_string(), name.to_string(), version)
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let records = self.records.read().await;
        let mut history: Vec<StoredRelease> = records
            .values()
            .filter(|r| r.namespace == namespace && r.name == name)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(history)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let mut records = self.records.write().await;
        let key = key(&release.namespace, &release.name, release.version);
        if records.contains_key(&key) {
            return Err(KubeError::ReleaseExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }
        records.insert(key, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&key(&release.namespace, &release.name, release.version)) {
            Some(existing) => {
                *existing = release.clone();
                Ok(())
            }
            None => Err(KubeError::ReleaseNotFound {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
        }
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.records
            .write()
            .await
            .remove(&key(namespace, name, version))
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ChartMetadata, Values};
    use semver::Version;

    fn release(name: &str) -> StoredRelease {
        StoredRelease::for_install(
            name,
            "prod",
            ChartMetadata::new(name, Version::new(1, 0, 0)),
            Values::new(),
            String::new(),
        )
    }

    #[tokio::test]
    async fn test_latest_and_history() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.latest("prod", "web").await,
            Err(KubeError::ReleaseNotFound { .. })
        ));

        let first = release("web");
        store.create(&first).await.unwrap();
        let second = StoredRelease::for_upgrade(&first, first.chart.clone(), Values::new(), String::new());
        store.create(&second).await.unwrap();
        store.create(&release("other")).await.unwrap();

        assert_eq!(store.latest("prod", "web").await.unwrap().version, 2);
        let versions: Vec<u32> = store
            .history("prod", "web")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![2, 1]);
        assert!(store.history("staging", "web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_is_conditional() {
        let store = MemoryStore::new();
        store.create(&release("web")).await.unwrap();
        let err = store.create(&release("web")).await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseExists { .. }));
    }

    #[tokio::test]
    async fn test_update_delete_and_prune() {
        let first = release("web");
        let second = StoredRelease::for_upgrade(&first, first.chart.clone(), Values::new(), String::new());
        let store = MemoryStore::with_releases([first.clone(), second]);

        let mut updated = first.clone();
        updated.mark_deployed();
        store.update(&updated).await.unwrap();

        let removed = store.prune("prod", "web", 1).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].version, 1);
        assert_eq!(store.all().await.len(), 1);

        assert!(store.delete("prod", "web", 1).await.is_err());
        assert!(store.update(&updated).await.is_err());
    }
}
