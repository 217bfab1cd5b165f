//! Repository configuration and environment settings
//!
//! Repositories are listed in `repositories.yaml` so dependencies can refer
//! to them by alias (`@stable` or `alias:stable`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Environment variable overriding the repository config file
pub const REPOSITORY_CONFIG_ENV: &str = "KEEL_REPOSITORY_CONFIG";

/// Environment variable overriding the repository cache directory
pub const REPOSITORY_CACHE_ENV: &str = "KEEL_REPOSITORY_CACHE";

/// Repository configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub repositories: Vec<Repository>,
}

fn default_api_version() -> String {
    "keel/v1".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            repositories: Vec::new(),
        }
    }
}

impl RepositoryConfig {
    /// Load the config at `path`, or an empty config if the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Add or replace a repository
    pub fn upsert(&mut self, repo: Repository) {
        match self.repositories.iter_mut().find(|r| r.name == repo.name) {
            Some(existing) => *existing = repo,
            None => self.repositories.push(repo),
        }
    }
}

/// Repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,

    /// Repository URL (HTTP(S) or OCI)
    pub url: String,

    /// Repository type (detected from the URL when omitted)
    #[serde(default)]
    pub repo_type: Option<RepositoryType>,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let repo_type = RepositoryType::detect(&url)?;
        Ok(Self {
            name: name.into(),
            url,
            repo_type: Some(repo_type),
        })
    }

    pub fn kind(&self) -> Result<RepositoryType> {
        match self.repo_type.clone() {
            Some(kind) => Ok(kind),
            None => RepositoryType::detect(&self.url),
        }
    }
}

/// Repository type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    /// HTTP repository serving `index.yaml`
    Http,

    /// OCI-compliant registry
    Oci,

    /// Local filesystem
    File,
}

impl RepositoryType {
    /// Auto-detect repository type from URL
    pub fn detect(url: &str) -> Result<Self> {
        if url.starts_with("oci://") {
            Ok(RepositoryType::Oci)
        } else if url.starts_with("file://") {
            Ok(RepositoryType::File)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(RepositoryType::Http)
        } else {
            Err(RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "URL must start with http://, https://, oci:// or file://".to_string(),
            })
        }
    }
}

/// Where repository configuration and downloaded archives live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub repository_config: PathBuf,
    pub repository_cache: PathBuf,
}

impl EnvSettings {
    /// Read the settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var_os(key).map(PathBuf::from))
    }

    /// Build the settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<PathBuf>) -> Result<Self> {
        let repository_config = match lookup(REPOSITORY_CONFIG_ENV) {
            Some(path) => path,
            None => dirs::config_dir()
                .ok_or_else(|| RepoError::InvalidConfig {
                    message: "Could not determine config directory".to_string(),
                })?
                .join("keel")
                .join("repositories.yaml"),
        };

        let repository_cache = match lookup(REPOSITORY_CACHE_ENV) {
            Some(path) => path,
            None => dirs::cache_dir()
                .ok_or_else(|| RepoError::InvalidConfig {
                    message: "Could not determine cache directory".to_string(),
                })?
                .join("keel")
                .join("repository"),
        };

        Ok(Self {
            repository_config,
            repository_cache,
        })
    }

    /// Load the repository config these settings point at
    pub fn load_repositories(&self) -> Result<RepositoryConfig> {
        RepositoryConfig::load_or_default(&self.repository_config)
    }
}
