//! Release history stores
//!
//! - **ConfigMap**: one ConfigMap per revision in the release namespace,
//!   holding the gzipped, base64 encoded JSON record
//! - **Memory**: process-local, for tests and dry runs
//!
//! `create` is conditional in every store: writing a revision that already
//! exists fails with `ReleaseExists`, so two writers racing to install the
//! same release cannot both succeed.

mod configmap;
mod memory;

pub use configmap::ConfigMapStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Label selecting every record written by keel
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "keel";
pub const RELEASE_NAME_LABEL: &str = "keel.sh/release-name";
pub const RELEASE_VERSION_LABEL: &str = "keel.sh/release-version";
pub const RELEASE_STATUS_LABEL: &str = "keel.sh/release-status";

/// Persistence for release history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All revisions of a release, newest first (empty if none)
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Write a new revision; fails with `ReleaseExists` if it is already stored
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Overwrite an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    /// Remove a revision and return it
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Most recent revision, or `ReleaseNotFound`
    async fn latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.history(namespace, name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    /// Delete everything but the newest `keep` revisions
    async fn prune(&self, namespace: &str, name: &str, keep: usize) -> Result<Vec<StoredRelease>> {
        let mut removed = Vec::new();
        for old in self.history(namespace, name).await?.into_iter().skip(keep) {
            removed.push(self.delete(namespace, name, old.version).await?);
        }
        Ok(removed)
    }
}

/// Serialize, gzip and base64 encode a record
pub fn encode_release(release: &StoredRelease) -> Result<String> {
    let json = serde_json::to_vec(release)?;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| KubeError::Storage(format!("compression error: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| KubeError::Storage(format!("compression error: {}", e)))?;

    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`encode_release`]
pub fn decode_release(data: &str) -> Result<StoredRelease> {
    let compressed = STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;

    let mut json = Vec::new();
    flate2::read::GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| KubeError::Storage(format!("decompression error: {}", e)))?;

    Ok(serde_json::from_slice(&json)?)
}

/// Labels applied to every stored record
pub fn storage_labels(release: &StoredRelease) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (RELEASE_NAME_LABEL.to_string(), release.name.clone()),
        (RELEASE_VERSION_LABEL.to_string(), release.version.to_string()),
        (
            RELEASE_STATUS_LABEL.to_string(),
            release.state.status_name().to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ChartMetadata, Values};
    use semver::Version;

    #[test]
    fn test_encode_decode() {
        let mut values = Values::new();
        values.set("replicas", serde_json::json!(3)).unwrap();
        let release = StoredRelease::for_install(
            "web",
            "prod",
            ChartMetadata::new("web", Version::new(1, 2, 3)),
            values,
            "---\nkind: ConfigMap\n".to_string(),
        );

        let encoded = encode_release(&release).unwrap();
        assert!(!encoded.contains("ConfigMap"));
        let decoded = decode_release(&encoded).unwrap();
        assert_eq!(decoded.storage_key(), release.storage_key());
        assert_eq!(decoded.values.get("replicas"), Some(&serde_json::json!(3)));
        assert_eq!(decoded.manifest, release.manifest);
        assert_eq!(decoded.state, release.state);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_release("%%%"),
            Err(KubeError::Serialization(_))
        ));
        assert!(matches!(
            decode_release(&STANDARD.encode(b"not gzip")),
            Err(KubeError::Storage(_))
        ));
    }

    #[test]
    fn test_storage_labels() {
        let release = StoredRelease::for_install(
            "web",
            "prod",
            ChartMetadata::new("web", Version::new(1, 0, 0)),
            Values::new(),
            String::new(),
        );
        let labels = storage_labels(&release);
        assert_eq!(labels[MANAGED_BY_LABEL], "keel");
        assert_eq!(labels[RELEASE_VERSION_LABEL], "1");
        assert_eq!(labels[RELEASE_STATUS_LABEL], "pending-install");
    }
}
