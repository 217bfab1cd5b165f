//! Where a dependency is fetched from

use std::path::{Path, PathBuf};

use keel_core::Dependency;

use crate::config::{RepositoryConfig, RepositoryType};
use crate::error::{RepoError, Result};

/// Resolved location of a single dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// A chart directory on the local filesystem
    Local { path: PathBuf },

    /// An HTTP repository serving `index.yaml`
    Repository { url: String },

    /// An OCI registry; `reference` is the repository without the chart name
    Registry { reference: String },
}

impl DependencySource {
    /// Work out where `dep` comes from
    ///
    /// A relative `file://` path is resolved against `chart_root`.
    /// `@name` and `alias:name` are looked up in `repositories`.
    pub fn for_dependency(
        dep: &Dependency,
        chart_root: &Path,
        repositories: &RepositoryConfig,
    ) -> Result<Self> {
        let repository = dep.repository.trim();

        if repository.is_empty() {
            return Err(RepoError::InvalidConfig {
                message: format!("dependency {} has no repository", dep.name),
            });
        }

        if let Some(alias) = repository
            .strip_prefix('@')
            .or_else(|| repository.strip_prefix("alias:"))
        {
            let repo = repositories
                .get(alias)
                .ok_or_else(|| RepoError::RepositoryNotFound {
                    name: alias.to_string(),
                })?;
            return Self::from_url(&repo.url, repo.kind()?, chart_root);
        }

        Self::from_url(repository, RepositoryType::detect(repository)?, chart_root)
    }

    fn from_url(url: &str, kind: RepositoryType, chart_root: &Path) -> Result<Self> {
        Ok(match kind {
            RepositoryType::File => {
                let relative = url.trim_start_matches("file://");
                let path = Path::new(relative);
                Self::Local {
                    path: if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        chart_root.join(path)
                    },
                }
            }
            RepositoryType::Http => Self::Repository {
                url: url.trim_end_matches('/').to_string(),
            },
            RepositoryType::Oci => Self::Registry {
                reference: url.trim_end_matches('/').to_string(),
            },
        })
    }
}
