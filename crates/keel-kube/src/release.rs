//! Release history records

use chrono::{DateTime, Utc};
use keel_core::{ChartMetadata, ResourceDocument, Values, split_manifest};
use serde::{Deserialize, Serialize};

use crate::error::{KubeError, Result};

/// One revision of a release as kept in the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    pub name: String,

    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub version: u32,

    pub state: ReleaseState,

    /// Chart metadata at deploy time
    pub chart: ChartMetadata,

    /// Override values the release was rendered with
    pub values: Values,

    /// Every applied resource, one YAML document each
    pub manifest: String,

    #[serde(default)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// Create the first revision of a release
    pub fn for_install(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: 1,
            state: ReleaseState::PendingInstall { started_at: now },
            chart,
            values,
            manifest,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the revision that follows `previous`
    pub fn for_upgrade(
        previous: &StoredRelease,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                previous_version: previous.version,
            },
            chart,
            values,
            manifest,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name of the object the store keeps this revision in
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }

    /// Resources recorded in the manifest
    pub fn resources(&self) -> Result<Vec<ResourceDocument>> {
        split_manifest(&self.manifest).map_err(|e| KubeError::InvalidManifest(e.to_string()))
    }

    pub fn mark_deployed(&mut self) {
        self.state = ReleaseState::Deployed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.state = ReleaseState::Failed {
            reason: reason.into(),
            failed_at: now,
        };
        self.updated_at = now;
    }

    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }
}

/// `sh.keel.release.v1.<name>.v<revision>`
pub fn storage_key(name: &str, version: u32) -> String {
    format!("sh.keel.release.v1.{}.v{}", name, version)
}

/// Release status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReleaseState {
    Deployed,

    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    /// Replaced by a newer revision
    Superseded,

    PendingInstall {
        started_at: DateTime<Utc>,
    },

    PendingUpgrade {
        started_at: DateTime<Utc>,
        previous_version: u32,
    },

    Uninstalled,
}

impl ReleaseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInstall { .. } | Self::PendingUpgrade { .. })
    }

    /// Human-readable status name
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed { .. } => "failed",
            Self::Superseded => "superseded",
            Self::PendingInstall { .. } => "pending-install",
            Self::PendingUpgrade { .. } => "pending-upgrade",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn release() -> StoredRelease {
        StoredRelease::for_install(
            "web",
            "prod",
            ChartMetadata::new("web", Version::new(1, 0, 0)),
            Values::new(),
            "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\n".to_string(),
        )
    }

    #[test]
    fn test_lifecycle() {
        let mut first = release();
        assert_eq!(first.version, 1);
        assert!(first.state.is_pending());
        assert_eq!(first.storage_key(), "sh.keel.release.v1.web.v1");

        first.mark_deployed();
        assert_eq!(first.state, ReleaseState::Deployed);

        let second = StoredRelease::for_upgrade(
            &first,
            first.chart.clone(),
            Values::new(),
            String::new(),
        );
        assert_eq!(second.version, 2);
        assert_eq!(second.state.status_name(), "pending-upgrade");
    }

    #[test]
    fn test_state_serialization() {
        let mut r = release();
        r.mark_failed("boom");
        let json = serde_json::to_value(&r.state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
    }

    #[test]
    fn test_resources() {
        let resources = release().resources().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, "ConfigMap");
    }
}
