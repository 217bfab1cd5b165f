//! Byte fetching over HTTP

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Timeout applied to each repository request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the bytes behind a URL
///
/// The resolver only talks to HTTP repositories through this trait so tests
/// and alternative transports can stand in for `reqwest`.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// `Getter` backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Getter for HttpGetter {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "fetching");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("GET {}", url),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// `sha256:<hex>` digest of `data`
pub fn compute_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Compare digests, ignoring case and an optional `sha256:` prefix
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        let d = d.trim().to_ascii_lowercase();
        d.strip_prefix("sha256:").map(str::to_string).unwrap_or(d)
    };
    normalize(expected) == normalize(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_digest() {
        assert_eq!(
            compute_digest(b"hello world"),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_matches() {
        let digest = compute_digest(b"hello world");
        assert!(digest_matches(&digest, &digest));
        assert!(digest_matches(
            "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9",
            &digest
        ));
        assert!(!digest_matches("sha256:abc", &digest));
    }
}
