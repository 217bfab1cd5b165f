//! Client-only chart import
//!
//! Renders a bundle into raw manifests without touching the cluster or the
//! release history, for callers that embed the output elsewhere.

use keel_core::{ChartBundle, Values};
use keel_engine::{ChartRenderer, PLACEHOLDER_RELEASE_NAME, RenderSettings};
use keel_repo::DependencyResolver;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};

/// Where imported manifests are rendered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateConfig {
    /// Overrides the caller's namespace when set
    pub namespace: Option<String>,
}

/// Per-chart switch and overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartConfig {
    pub enabled: bool,
    pub values: Values,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            values: Values::new(),
        }
    }
}

/// Render `bundle` client-side under the placeholder release name
///
/// Returns the additional files followed by the rendered manifest, or
/// nothing when the chart is disabled. Missing dependencies are fetched
/// with `resolver` when one is given.
pub async fn import_template(
    bundle: &ChartBundle,
    template: &TemplateConfig,
    chart: &ChartConfig,
    namespace: &str,
    resolver: Option<&DependencyResolver>,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    if !chart.enabled {
        tracing::debug!(chart = %bundle.name(), "chart disabled, skipping import");
        return Ok(Vec::new());
    }

    render_outputs(bundle, template, chart, namespace, resolver, cancel)
        .await
        .map_err(|e| e.during("cannot import template", bundle.name()))
}

async fn render_outputs(
    bundle: &ChartBundle,
    template: &TemplateConfig,
    chart: &ChartConfig,
    namespace: &str,
    resolver: Option<&DependencyResolver>,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let workdir = bundle.export_temp()?;

    if let Some(resolver) = resolver {
        resolver.ensure(workdir.path(), cancel).await?;
    }

    let namespace = template.namespace.as_deref().unwrap_or(namespace);
    let settings = RenderSettings::new(workdir.path(), namespace)
        .with_release_name(PLACEHOLDER_RELEASE_NAME)
        .with_values(chart.values.clone())
        .with_cancel(cancel.clone())
        .with_additional_files(bundle.additional_manifests());

    let rendered = ChartRenderer::default()
        .render(&settings)
        .map_err(KubeError::from)?;

    tracing::debug!(
        chart = %bundle.name(),
        namespace,
        documents = rendered.documents.len(),
        "imported template"
    );
    Ok(rendered.outputs())
}
