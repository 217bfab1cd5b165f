//! Keel dependency resolution
//!
//! Materializes the dependencies declared in a chart's `Chart.yaml` under
//! its `charts/` directory:
//!
//! - **HTTP repositories**: `index.yaml` lookup with semver constraints
//! - **OCI registries**: `oci://` references, tags matched against constraints
//! - **Local charts**: `file://` paths relative to the chart
//! - **Aliases**: `@name` / `alias:name` entries from `repositories.yaml`
//!
//! ## Example
//!
//! ```rust,no_run
//! use keel_repo::DependencyResolver;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = DependencyResolver::from_env()?;
//! let fetched = resolver
//!     .ensure(std::path::Path::new("./web"), &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Archive digests from the index are checked when present. Chart signatures
//! are never verified.

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod oci;
pub mod resolver;
pub mod source;

pub use archive::extract_chart;
pub use config::{EnvSettings, Repository, RepositoryConfig, RepositoryType};
pub use error::{RepoError, Result};
pub use fetch::{Getter, HttpGetter};
pub use index::{ChartEntry, RepositoryIndex, VersionConstraint};
pub use oci::OciRegistry;
pub use resolver::{DependencyResolver, ResolvedDependency};
pub use source::DependencySource;
