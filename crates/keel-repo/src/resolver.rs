//! Dependency resolution
//!
//! Declared dependencies are fetched into a staging directory next to the
//! chart and moved into `charts/` in one rename once every dependency has
//! been materialized. A failure or cancellation drops the staging directory,
//! so `charts/` is either complete or untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_core::{Dependency, LoadedChart, WorkDir};
use semver::Version;
use tokio_util::sync::CancellationToken;
use url::Url;
use walkdir::WalkDir;

use crate::archive::extract_chart;
use crate::config::{EnvSettings, RepositoryConfig};
use crate::error::{RepoError, Result};
use crate::fetch::{Getter, HttpGetter, compute_digest, digest_matches};
use crate::index::{RepositoryIndex, VersionConstraint};
use crate::oci::OciRegistry;
use crate::source::DependencySource;

/// A dependency materialized under `charts/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Directory name under `charts/` (alias if set)
    pub name: String,
    pub version: Version,
    pub source: DependencySource,
}

/// Materializes a chart's declared dependencies
pub struct DependencyResolver {
    getter: Arc<dyn Getter>,
    repositories: RepositoryConfig,
    cache_dir: Option<PathBuf>,
}

impl DependencyResolver {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            getter,
            repositories: RepositoryConfig::default(),
            cache_dir: None,
        }
    }

    /// HTTP getter plus repositories and archive cache from the environment
    pub fn from_env() -> Result<Self> {
        let settings = EnvSettings::from_env()?;
        Ok(Self::new(Arc::new(HttpGetter::new()?))
            .with_repositories(settings.load_repositories()?)
            .with_cache_dir(settings.repository_cache))
    }

    pub fn with_repositories(mut self, repositories: RepositoryConfig) -> Self {
        self.repositories = repositories;
        self
    }

    /// Keep downloaded archives in `dir` and reuse them on later runs
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Resolve dependencies unless `charts/` is already present
    ///
    /// Returns whether anything was fetched. An existing `charts/` directory
    /// is used as is, even if it no longer matches `Chart.yaml`.
    pub async fn ensure(&self, chart_path: &Path, cancel: &CancellationToken) -> Result<bool> {
        let chart = LoadedChart::load(chart_path)?;

        if chart.has_materialized_dependencies() {
            tracing::debug!(chart = %chart.name(), "using existing charts directory");
            return Ok(false);
        }
        if !chart.metadata.dependencies.iter().any(|d| d.enabled) {
            return Ok(false);
        }

        self.resolve(chart_path, cancel).await?;
        Ok(true)
    }

    /// Fetch every enabled dependency of the chart at `chart_path` into `charts/`
    ///
    /// An existing `charts/` directory is replaced only after all fetches
    /// succeed.
    pub async fn resolve(
        &self,
        chart_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedDependency>> {
        let chart = LoadedChart::load(chart_path)?;
        let deps: Vec<&Dependency> = chart
            .metadata
            .dependencies
            .iter()
            .filter(|d| {
                if !d.enabled {
                    tracing::debug!(dependency = %d.name, "skipping disabled dependency");
                }
                d.enabled
            })
            .collect();

        if deps.is_empty() {
            return Ok(Vec::new());
        }

        let staging = WorkDir::new_in(&chart.root, "charts-staging")?;
        let mut indexes = HashMap::new();
        let mut resolved = Vec::with_capacity(deps.len());

        for dep in deps {
            if cancel.is_cancelled() {
                return Err(RepoError::Cancelled);
            }

            let dest = staging.path().join(dep.effective_name());
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RepoError::Cancelled),
                result = self.fetch(dep, &chart.root, &dest, &mut indexes) => result,
            };

            match fetched {
                Ok(dependency) => {
                    tracing::info!(
                        chart = %chart.name(),
                        dependency = %dependency.name,
                        version = %dependency.version,
                        "dependency materialized"
                    );
                    resolved.push(dependency);
                }
                Err(e) => return Err(RepoError::for_dependency(chart.name(), &dep.name, e)),
            }
        }

        if chart.charts_dir.exists() {
            std::fs::remove_dir_all(&chart.charts_dir)?;
        }
        let staged = staging.keep();
        if let Err(e) = std::fs::rename(&staged, &chart.charts_dir) {
            let _ = std::fs::remove_dir_all(&staged);
            return Err(e.into());
        }

        Ok(resolved)
    }

    async fn fetch(
        &self,
        dep: &Dependency,
        chart_root: &Path,
        dest: &Path,
        indexes: &mut HashMap<String, RepositoryIndex>,
    ) -> Result<ResolvedDependency> {
        let source = DependencySource::for_dependency(dep, chart_root, &self.repositories)?;
        let constraint = VersionConstraint::parse(&dep.version)?;

        match &source {
            DependencySource::Local { path } => {
                let local = LoadedChart::load(path)?;
                if !constraint.matches(&local.metadata.version) {
                    return Err(RepoError::UnsatisfiableConstraint {
                        name: dep.name.clone(),
                        constraint: dep.version.clone(),
                        available: local.metadata.version.to_string(),
                    });
                }
                copy_dir(path, dest)?;
            }
            DependencySource::Repository { url } => {
                if !indexes.contains_key(url) {
                    let bytes = self.getter.get(&format!("{}/index.yaml", url)).await?;
                    indexes.insert(url.clone(), RepositoryIndex::from_bytes(&bytes)?);
                }
                let index = &indexes[url];

                let entry = index.find_best_match(&dep.name, &dep.version).map_err(|e| match e {
                    RepoError::ChartNotFound { name, .. } => RepoError::ChartNotFound {
                        name,
                        repo: url.clone(),
                    },
                    other => other,
                })?;

                let download = entry.download_url().ok_or_else(|| RepoError::ChartNotFound {
                    name: dep.name.clone(),
                    repo: url.clone(),
                })?;
                let download = join_url(url, download)?;

                let data = self
                    .download(
                        url,
                        &entry.name,
                        &entry.version,
                        &download,
                        entry.digest.as_deref(),
                    )
                    .await?;
                extract_chart(&data, dest)?;
            }
            DependencySource::Registry { reference } => {
                let registry = OciRegistry::new(reference);
                let version = match VersionConstraint::exact(&dep.version) {
                    Some(version) => version,
                    None => {
                        let tags = registry.list_tags(&dep.name).await?;
                        best_tag(&tags, &constraint).ok_or_else(|| {
                            RepoError::UnsatisfiableConstraint {
                                name: dep.name.clone(),
                                constraint: dep.version.clone(),
                                available: tags.join(", "),
                            }
                        })?
                    }
                };

                // OCI tags cannot carry build metadata
                let tag = version.to_string().replace('+', "_");
                let data = registry.pull(&dep.name, &tag).await?;
                extract_chart(&data, dest)?;
            }
        }

        let materialized = LoadedChart::load(dest)?;
        Ok(ResolvedDependency {
            name: dep.effective_name().to_string(),
            version: materialized.metadata.version,
            source,
        })
    }

    /// Fetch an archive, going through the archive cache when configured
    ///
    /// Archives are cached per repository and only once they match the
    /// index digest. A cached archive that no longer matches is dropped and
    /// fetched again.
    async fn download(
        &self,
        repository: &str,
        name: &str,
        version: &str,
        url: &str,
        digest: Option<&str>,
    ) -> Result<Vec<u8>> {
        let Some(cache_dir) = &self.cache_dir else {
            let data = self.getter.get(url).await?;
            verify_digest(name, digest, &data)?;
            return Ok(data);
        };

        let cached = cache_path(cache_dir, repository, name, version);
        if cached.is_file() {
            let data = std::fs::read(&cached)?;
            match verify_digest(name, digest, &data) {
                Ok(()) => {
                    tracing::debug!(path = %cached.display(), "using cached archive");
                    return Ok(data);
                }
                Err(e) => {
                    tracing::warn!(path = %cached.display(), error = %e, "dropping cached archive");
                    std::fs::remove_file(&cached)?;
                }
            }
        }

        let data = self.getter.get(url).await?;
        verify_digest(name, digest, &data)?;
        if let Some(parent) = cached.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&cached, &data)?;
        Ok(data)
    }
}

/// Cache location of an archive, keyed by repository so equal chart names
/// from different repositories never share an entry
fn cache_path(cache_dir: &Path, repository: &str, name: &str, version: &str) -> PathBuf {
    let key = compute_digest(repository.trim_end_matches('/').as_bytes());
    let key = key.trim_start_matches("sha256:");
    cache_dir
        .join(&key[..16])
        .join(format!("{}-{}.tgz", name, version))
}

fn verify_digest(name: &str, expected: Option<&str>, data: &[u8]) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = compute_digest(data);
    if digest_matches(expected, &actual) {
        Ok(())
    } else {
        Err(RepoError::IntegrityCheckFailed {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Resolve a possibly relative download URL against the repository URL
fn join_url(repository: &str, download: &str) -> Result<String> {
    let invalid = |e: url::ParseError| RepoError::InvalidRepositoryUrl {
        url: repository.to_string(),
        reason: e.to_string(),
    };
    let base = Url::parse(&format!("{}/", repository.trim_end_matches('/'))).map_err(invalid)?;
    Ok(base.join(download).map_err(invalid)?.to_string())
}

/// Highest tag that parses as a version and satisfies the constraint
fn best_tag(tags: &[String], constraint: &VersionConstraint) -> Option<Version> {
    tags.iter()
        .filter_map(|t| Version::parse(&t.replace('_', "+")).ok())
        .filter(|v| constraint.matches(v))
        .max()
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            RepoError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other(format!("failed to walk {}", src.display()))
            }))
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
