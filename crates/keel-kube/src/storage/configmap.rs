//! ConfigMap history store

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{
    HistoryStore, MANAGED_BY, MANAGED_BY_LABEL, RELEASE_NAME_LABEL, decode_release,
    encode_release, storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{StoredRelease, storage_key};

/// Data key holding the encoded record
const RELEASE_DATA_KEY: &str = "release";

/// Stores each revision in a ConfigMap named `sh.keel.release.v1.<name>.v<rev>`
pub struct ConfigMapStore {
    client: Client,
}

impl ConfigMapStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create with the default kubeconfig or in-cluster client
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build(release: &StoredRelease) -> Result<ConfigMap> {
        let data = BTreeMap::from([(RELEASE_DATA_KEY.to_string(), encode_release(release)?)]);
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(storage_labels(release)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse(config_map: &ConfigMap) -> Result<StoredRelease> {
        let data = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| {
                KubeError::Storage(format!(
                    "ConfigMap {} missing '{}' data",
                    config_map.metadata.name.as_deref().unwrap_or_default(),
                    RELEASE_DATA_KEY
                ))
            })?;
        decode_release(data)
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl HistoryStore for ConfigMapStore {
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let selector = format!(
            "{}={},{}={}",
            MANAGED_BY_LABEL, MANAGED_BY, RELEASE_NAME_LABEL, name
        );
        let list = self
            .api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        let mut releases = Vec::with_capacity(list.items.len());
        for config_map in &list.items {
            match Self::parse(config_map) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    configmap = config_map.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unreadable release record"
                ),
            }
        }

        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let config_map = Self::build(release)?;
        match self
            .api(&release.namespace)
            .create(&PostParams::default(), &config_map)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let config_map = Self::build(release)?;
        match self
            .api(&release.namespace)
            .replace(&release.storage_key(), &PostParams::default(), &config_map)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(Self::not_found(&release.namespace, &release.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        let api = self.api(namespace);
        let key = storage_key(name, version);

        let release = match api.get(&key).await {
            Ok(config_map) => Self::parse(&config_map)?,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Self::not_found(namespace, name));
            }
            Err(e) => return Err(e.into()),
        };

        match api.delete(&key, &DeleteParams::default()).await {
            Ok(_) => Ok(release),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(release),
            Err(e) => Err(e.into()),
        }
    }
}
