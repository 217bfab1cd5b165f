//! Keel Core - chart bundles, values and resource documents
//!
//! This crate provides the foundational types used throughout keel:
//! - `ChartBundle`: an in-memory chart that can be exported to disk
//! - `LoadedChart`: a chart directory on disk with resolved paths
//! - `Values`: configuration values with deep merge support
//! - `ResourceDocument`: a single parsed Kubernetes resource
//! - `package`: repackage rendered resources as an installable chart

pub mod bundle;
pub mod chart;
pub mod context;
pub mod error;
pub mod package;
pub mod release;
pub mod resource;
pub mod values;
pub mod workdir;

pub use bundle::{BundleFile, ChartBundle};
pub use chart::{ChartKind, ChartMetadata, Dependency, LoadedChart, evaluate_condition};
pub use context::{Capabilities, ChartInfo, KubeVersion, TemplateContext, TemplateInfo};
pub use error::{CoreError, Result};
pub use package::{package, package_into};
pub use release::{RELEASE_SERVICE, ReleaseInfo};
pub use resource::{ResourceDir, ResourceDocument, split_manifest};
pub use values::{ValueOptions, Values, merge_values, parse_set_values};
pub use workdir::WorkDir;
