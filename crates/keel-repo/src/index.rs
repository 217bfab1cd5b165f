//! Repository index types
//!
//! The `index.yaml` format served by chart repositories

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When this index was generated
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Get all versions of a chart
    pub fn get(&self, name: &str) -> Option<&Vec<ChartEntry>> {
        self.entries.get(name)
    }

    /// Find versions matching a constraint
    pub fn find_matching(&self, name: &str, constraint: &str) -> Result<Vec<&ChartEntry>> {
        let entries = self.entries.get(name).ok_or_else(|| RepoError::ChartNotFound {
            name: name.to_string(),
            repo: "index".to_string(),
        })?;
        let constraint = VersionConstraint::parse(constraint)?;

        Ok(entries
            .iter()
            .filter(|e| e.parsed_version().is_some_and(|v| constraint.matches(&v)))
            .collect())
    }

    /// Find the highest version matching a constraint
    ///
    /// Deprecated entries are only picked when nothing else matches.
    pub fn find_best_match(&self, name: &str, constraint: &str) -> Result<&ChartEntry> {
        let matching = self.find_matching(name, constraint)?;

        matching
            .into_iter()
            .max_by(|a, b| {
                b.deprecated
                    .cmp(&a.deprecated)
                    .then_with(|| compare_versions(a, b))
            })
            .ok_or_else(|| RepoError::UnsatisfiableConstraint {
                name: name.to_string(),
                constraint: constraint.to_string(),
                available: self
                    .entries
                    .get(name)
                    .map(|v| {
                        v.iter()
                            .map(|e| e.version.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| "none".to_string()),
            })
    }
}

fn compare_versions(a: &ChartEntry, b: &ChartEntry) -> Ordering {
    match (a.parsed_version(), b.parsed_version()) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.version.cmp(&b.version),
    }
}

/// Chart entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    /// Chart version (semver)
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,
}

impl ChartEntry {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Parse version as semver
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

/// A dependency version constraint
///
/// Accepts the forms found in `Chart.yaml` files: comparators separated by
/// spaces or commas (`>= 1.2, < 2`), alternatives joined by `||`, caret,
/// tilde and wildcard forms. A bare version is an exact match.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    alternatives: Vec<VersionReq>,
}

impl VersionConstraint {
    pub fn parse(constraint: &str) -> Result<Self> {
        let invalid = |message: String| RepoError::InvalidConstraint {
            constraint: constraint.to_string(),
            message,
        };

        let alternatives = constraint
            .split("||")
            .map(|alt| {
                let normalized = normalize(alt);
                VersionReq::parse(&normalized).map_err(|e| invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// The version pinned by an exact constraint such as `1.2.3` or `=1.2.3`
    pub fn exact(constraint: &str) -> Option<Version> {
        let trimmed = constraint.trim().trim_start_matches('=').trim();
        Version::parse(trimmed.trim_start_matches('v')).ok()
    }
}

/// Turn space separated comparators into the comma separated form
fn normalize(alternative: &str) -> String {
    const OPERATORS: &str = "<>=~^";

    let mut comparators = Vec::new();
    let mut pending_op = String::new();

    for token in alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| OPERATORS.contains(c)) {
            pending_op.push_str(token);
            continue;
        }

        let version = token.trim_start_matches(|c: char| OPERATORS.contains(c));
        let mut op = std::mem::take(&mut pending_op);
        op.push_str(&token[..token.len() - version.len()]);
        let version = version.trim_start_matches('v');

        let is_full_version = version.split('.').count() == 3
            && !version.contains(['x', 'X', '*'])
            && version.starts_with(|c: char| c.is_ascii_digit());
        if op.is_empty() && is_full_version {
            op.push('=');
        }
        comparators.push(format!("{}{}", op, version));
    }

    if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    }
}
