//! Cluster access
//!
//! The reconciler only reaches the cluster through [`ClusterClient`].
//! [`KubeCluster`] implements it with Server-Side Apply on dynamic objects,
//! resolving kinds through API discovery.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keel_core::ResourceDocument;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use tokio::sync::RwLock;

use crate::error::{KubeError, Result};
use crate::health::{Readiness, readiness};
use crate::resources::ResourceRef;

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "keel";

/// Result of applying one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedResource {
    pub resource: ResourceRef,
    /// The object did not exist before the apply
    pub created: bool,
}

/// Operations the reconciler needs from a cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Apply one document; namespaced kinds without a namespace land in `namespace`
    async fn apply(&self, doc: &ResourceDocument, namespace: &str) -> Result<AppliedResource>;

    /// Current readiness of an applied resource
    async fn readiness(&self, resource: &ResourceRef) -> Result<Readiness>;

    /// Delete a resource; a missing object is not an error
    async fn delete(&self, resource: &ResourceRef) -> Result<()>;
}

/// [`ClusterClient`] backed by a `kube` client
pub struct KubeCluster {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeCluster {
    /// Run API discovery and wrap the client
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    /// Connect with the default kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        Self::new(Client::try_default().await?).await
    }

    /// Resolve a kind, re-running discovery once for kinds registered since
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        let gvk = gvk(api_version, kind);
        if let Some(found) = self.discovery.read().await.resolve_gvk(&gvk) {
            return Ok(found);
        }

        tracing::debug!(api_version, kind, "unknown kind, refreshing discovery");
        let refreshed = Discovery::new(self.client.clone()).run().await?;
        let found = refreshed.resolve_gvk(&gvk);
        *self.discovery.write().await = refreshed;

        found.ok_or_else(|| KubeError::Apply {
            resource: format!("{}/{}", api_version, kind),
            message: "unknown resource type".to_string(),
        })
    }

    fn api(
        &self,
        resource: &ApiResource,
        capabilities: &ApiCapabilities,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        match (capabilities.scope.clone(), namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, resource),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_some() {
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await.map_err(KubeError::from) {
            Ok(_) => {
                tracing::info!(namespace, "created namespace");
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, doc: &ResourceDocument, namespace: &str) -> Result<AppliedResource> {
        let display = doc.display_name();
        let mut obj: DynamicObject = serde_json::from_value(doc.object.clone()).map_err(|e| {
            KubeError::Apply {
                resource: display.clone(),
                message: e.to_string(),
            }
        })?;

        let (resource, capabilities) = self.resolve(&doc.api_version, &doc.kind).await?;
        let target_namespace = match capabilities.scope {
            Scope::Namespaced => {
                let ns = obj
                    .metadata
                    .namespace
                    .get_or_insert_with(|| namespace.to_string());
                Some(ns.clone())
            }
            Scope::Cluster => None,
        };

        let api = self.api(&resource, &capabilities, target_namespace.as_deref());
        let existed = api.get_opt(&doc.name).await?.is_some();

        api.patch(
            &doc.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await
        .map_err(|e| KubeError::Apply {
            resource: display,
            message: e.to_string(),
        })?;

        Ok(AppliedResource {
            resource: ResourceRef {
                api_version: doc.api_version.clone(),
                kind: doc.kind.clone(),
                name: doc.name.clone(),
                namespace: target_namespace,
            },
            created: !existed,
        })
    }

    async fn readiness(&self, resource: &ResourceRef) -> Result<Readiness> {
        let (api_resource, capabilities) = self.resolve(&resource.api_version, &resource.kind).await?;
        let api = self.api(&api_resource, &capabilities, resource.namespace.as_deref());

        match api.get_opt(&resource.name).await? {
            Some(obj) => {
                let value = serde_json::to_value(&obj)?;
                Ok(readiness(&resource.kind, &value))
            }
            None => Ok(Readiness::Pending("not found".to_string())),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let (api_resource, capabilities) = self.resolve(&resource.api_version, &resource.kind).await?;
        let api = self.api(&api_resource, &capabilities, resource.namespace.as_deref());

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(&resource.name, &params).await.map_err(KubeError::from) {
            Ok(_) => {
                tracing::debug!(resource = %resource, "deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Split an apiVersion into group and version
///
/// `apps/v1` is group `apps`, version `v1`; `v1` is the core group.
fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}
