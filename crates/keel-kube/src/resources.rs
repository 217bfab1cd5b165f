//! Resource identity and apply ordering

use keel_core::ResourceDocument;
use std::fmt;

/// Identifies one object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// Namespace the object lives in; `None` once known to be cluster-scoped
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Identity of a manifest document, defaulting its namespace
    pub fn from_document(doc: &ResourceDocument, default_namespace: &str) -> Self {
        Self {
            api_version: doc.api_version.clone(),
            kind: doc.kind.clone(),
            name: doc.name.clone(),
            namespace: Some(
                doc.namespace
                    .clone()
                    .unwrap_or_else(|| default_namespace.to_string()),
            ),
        }
    }

    pub fn category(&self) -> ResourceCategory {
        ResourceCategory::from_resource(&self.kind, &self.api_version)
    }

    /// Identity of the stored object, whatever API version serves it
    ///
    /// A kind can move between groups and versions (`extensions/v1beta1` to
    /// `apps/v1` Deployments) while remaining the same object, so only kind,
    /// namespace and name take part.
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Version-independent identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Resource category for apply ordering
///
/// Resources are applied from lowest to highest category and deleted in
/// reverse, so CRDs and namespaces exist before anything that needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    Crd = 0,
    Namespace = 1,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 2,
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    Storage = 21,
    /// NetworkPolicy, Service, Ingress
    Network = 30,
    Workload = 40,
    Batch = 50,
    Autoscaling = 60,
    CustomResource = 70,
    Other = 100,
}

impl ResourceCategory {
    pub fn from_resource(kind: &str, api_version: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "PodDisruptionBudget" => Self::Autoscaling,
            _ if is_custom_api_version(api_version) => Self::CustomResource,
            _ => Self::Other,
        }
    }
}

/// Whether an apiVersion belongs to a group outside the built-in APIs
pub fn is_custom_api_version(api_version: &str) -> bool {
    const BUILTIN_GROUPS: &[&str] = &[
        "apps",
        "batch",
        "autoscaling",
        "policy",
        "networking.k8s.io",
        "rbac.authorization.k8s.io",
        "storage.k8s.io",
        "admissionregistration.k8s.io",
        "apiextensions.k8s.io",
        "certificates.k8s.io",
        "coordination.k8s.io",
        "discovery.k8s.io",
        "events.k8s.io",
        "flowcontrol.apiserver.k8s.io",
        "node.k8s.io",
        "scheduling.k8s.io",
    ];

    match api_version.rsplit_once('/') {
        Some((group, _)) => !BUILTIN_GROUPS.contains(&group),
        None => false,
    }
}

/// Order documents for apply; the sort is stable within a category
pub fn sort_for_apply(docs: &mut [ResourceDocument]) {
    docs.sort_by_key(|d| ResourceCategory::from_resource(&d.kind, &d.api_version));
}

/// Order references for deletion (reverse of apply order)
pub fn sort_for_delete(refs: &mut [ResourceRef]) {
    refs.sort_by(|a, b| b.category().cmp(&a.category()));
}
