//! Keel Engine - client-only chart rendering
//!
//! This crate renders an exported chart directory into a manifest:
//! - MiniJinja templates with Kubernetes-oriented filters
//! - Subcharts rendered with scoped values and condition gating
//! - Template errors carrying source spans for `miette` reports
//!
//! Nothing here contacts a cluster.

pub mod engine;
pub mod error;
pub mod filters;
pub mod renderer;
pub mod subchart;

pub use engine::{Engine, EngineBuilder, NOTES_TEMPLATE, RenderResult};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use filters::AVAILABLE_FILTERS;
pub use renderer::{
    ChartRenderer, MAX_RELEASE_NAME_LEN, PLACEHOLDER_RELEASE_NAME, RenderSettings,
    RenderedDocument, RenderedRelease, validate_release_name,
};
pub use subchart::{SubchartInfo, discover_subcharts};
