//! OCI registry client
//!
//! Charts are stored as OCI artifacts with a Helm config blob and a single
//! gzipped tar content layer. Only anonymous pulls are supported.

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;

use crate::error::{RepoError, Result};

/// Media types for charts in OCI
pub mod media_types {
    /// Chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// Client for one `oci://registry/path` repository
pub struct OciRegistry {
    base: String,
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistry {
    pub fn new(url: &str) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        Self {
            base: url.trim_start_matches("oci://").trim_end_matches('/').to_string(),
            client: Client::new(config),
            auth: RegistryAuth::Anonymous,
        }
    }

    /// Parse an OCI reference string
    ///
    /// Format: oci://registry/repo:tag or registry/repo:tag
    pub fn parse_reference(reference: &str) -> Result<Reference> {
        let clean = reference
            .trim_start_matches("oci://")
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        Reference::try_from(clean).map_err(|e| RepoError::InvalidOciReference {
            reference: format!("{}: {}", reference, e),
        })
    }

    /// Full reference of chart `name` at `tag` under this repository
    pub fn reference(&self, name: &str, tag: &str) -> Result<Reference> {
        Self::parse_reference(&format!("{}/{}:{}", self.base, name, tag))
    }

    /// Pull the chart content layer
    pub async fn pull(&self, name: &str, tag: &str) -> Result<Vec<u8>> {
        let reference = self.reference(name, tag)?;
        tracing::debug!(reference = %reference, "pulling chart");

        let image = self
            .client
            .pull(
                &reference,
                &self.auth,
                vec![media_types::HELM_CONFIG, media_types::HELM_CONTENT],
            )
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("Failed to pull {}: {}", reference, e),
            })?;

        image
            .layers
            .into_iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .map(|l| l.data)
            .ok_or_else(|| RepoError::OciError {
                message: "No chart content layer found in manifest".to_string(),
            })
    }

    /// List the tags published for chart `name`
    pub async fn list_tags(&self, name: &str) -> Result<Vec<String>> {
        let reference = self.reference(name, "latest")?;

        let tags = self
            .client
            .list_tags(&reference, &self.auth, None, None)
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("Failed to list tags: {}", e),
            })?;

        Ok(tags.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference() {
        let registry = OciRegistry::new("oci://ghcr.io/myorg/charts/");
        let reference = registry.reference("nginx", "1.0.0").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "myorg/charts/nginx");
        assert_eq!(reference.tag(), Some("1.0.0"));
    }

    #[test]
    fn test_invalid_reference() {
        let err = OciRegistry::parse_reference("oci://Not A Ref").unwrap_err();
        assert!(matches!(err, RepoError::InvalidOciReference { .. }));
    }
}
