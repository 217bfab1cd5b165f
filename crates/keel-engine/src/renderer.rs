//! Client-only chart rendering
//!
//! [`ChartRenderer`] turns an exported chart directory plus caller overrides
//! into a [`RenderedRelease`]. It never talks to a cluster and never records
//! a release.

use std::path::PathBuf;
use std::sync::LazyLock;

use keel_core::{
    Capabilities, KubeVersion, LoadedChart, ReleaseInfo, ResourceDocument, TemplateContext,
    Values, merge_values, split_manifest,
};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::{EngineError, Result, TemplateError};
use crate::subchart::{MAX_SUBCHART_DEPTH, discover_subcharts};

/// Release name used for client-only renders that have no real release
pub const PLACEHOLDER_RELEASE_NAME: &str = "RELEASE-NAME";

/// Longest release name accepted
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static RELEASE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

/// Inputs of a single render
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Exported chart directory
    pub chart_path: PathBuf,

    pub namespace: String,

    /// Release name; empty means the chart name
    pub release_name: String,

    /// Log every rendered template at debug level
    pub debug: bool,

    /// Caller overrides, merged over the chart defaults
    pub values: Values,

    pub cancel: CancellationToken,

    /// Put the chart's `crds/` content at the front of the manifest
    pub include_crds: bool,

    /// Raw resources emitted ahead of the manifest, unmodified
    pub additional_files: Vec<String>,

    /// Revision of the release being upgraded; `None` renders an install
    pub upgrade_revision: Option<u32>,

    pub kube_version: KubeVersion,
}

impl RenderSettings {
    pub fn new(chart_path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            chart_path: chart_path.into(),
            namespace: namespace.into(),
            release_name: String::new(),
            debug: false,
            values: Values::new(),
            cancel: CancellationToken::new(),
            include_crds: false,
            additional_files: Vec::new(),
            upgrade_revision: None,
            kube_version: KubeVersion::default(),
        }
    }

    pub fn with_release_name(mut self, name: impl Into<String>) -> Self {
        self.release_name = name.into();
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_crds(mut self, include: bool) -> Self {
        self.include_crds = include;
        self
    }

    pub fn with_additional_files(mut self, files: Vec<String>) -> Self {
        self.additional_files = files;
        self
    }

    pub fn with_upgrade_revision(mut self, revision: u32) -> Self {
        self.upgrade_revision = Some(revision);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// One rendered template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// `<chart>/templates/<file>`, with `charts/<sub>/` segments for subcharts
    pub source: String,
    pub content: String,
}

/// Output of a render
#[derive(Debug, Clone)]
pub struct RenderedRelease {
    pub release_name: String,
    pub namespace: String,
    pub chart: String,

    /// Concatenated resource documents, each behind a `# Source:` header
    pub manifest: String,

    /// Raw CRD files of the chart and its enabled subcharts
    pub crds: Vec<String>,

    /// Additional raw files, in declared order
    pub additional: Vec<String>,

    pub notes: Option<String>,

    pub documents: Vec<RenderedDocument>,
}

impl RenderedRelease {
    /// Additional files followed by the manifest
    pub fn outputs(&self) -> Vec<String> {
        let mut outputs = self.additional.clone();
        outputs.push(self.manifest.clone());
        outputs
    }

    /// Every resource in output order
    pub fn resources(&self) -> Result<Vec<ResourceDocument>> {
        let mut resources = Vec::new();
        for output in self.outputs() {
            resources.extend(split_manifest(&output)?);
        }
        Ok(resources)
    }
}

/// Check a release name against the DNS-label rules used for release storage
pub fn validate_release_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| EngineError::InvalidReleaseName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name == PLACEHOLDER_RELEASE_NAME {
        return Ok(());
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(invalid(&format!(
            "longer than {} characters",
            MAX_RELEASE_NAME_LEN
        )));
    }
    if !RELEASE_NAME.is_match(name) {
        return Err(invalid("must be lowercase alphanumerics, '-' or '.'"));
    }
    Ok(())
}

/// Renders charts client-side
#[derive(Debug, Clone, Default)]
pub struct ChartRenderer {
    engine: Engine,
}

impl ChartRenderer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Render the chart at `settings.chart_path`
    ///
    /// Fails when the chart cannot be loaded, the overrides do not merge,
    /// a template fails, a rendered document is not a resource, the render
    /// is cancelled or the templates produced no resource. Additional files
    /// do not count towards the manifest.
    pub fn render(&self, settings: &RenderSettings) -> Result<RenderedRelease> {
        let chart = LoadedChart::load(&settings.chart_path)?;
        let chart_name = chart.name().to_string();
        ensure_active(&settings.cancel, &chart_name)?;

        let release_name = if settings.release_name.is_empty() {
            chart_name.clone()
        } else {
            settings.release_name.clone()
        };
        validate_release_name(&release_name)?;

        let values = merge_values(&chart.default_values()?, &settings.values)?;
        let release = match settings.upgrade_revision {
            Some(revision) => ReleaseInfo::for_upgrade(&release_name, &settings.namespace, revision),
            None => ReleaseInfo::for_install(&release_name, &settings.namespace),
        };
        let capabilities = Capabilities {
            kube_version: settings.kube_version.clone(),
            api_versions: Vec::new(),
        };
        let context =
            TemplateContext::new(values, release, &chart.metadata).with_capabilities(capabilities);

        tracing::debug!(
            chart = %chart_name,
            release = %release_name,
            namespace = %settings.namespace,
            "rendering chart"
        );

        let mut out = Collected::default();
        self.render_recursive(&chart, &context, &chart_name, 0, &settings.cancel, &mut out)?;

        for doc in &out.documents {
            if settings.debug {
                tracing::debug!(source = %doc.source, "\n{}", doc.content);
            }
            split_manifest(&doc.content)
                .map_err(|e| TemplateError::invalid_output(&doc.source, &doc.content, e))?;
        }

        let mut manifest = String::new();
        if settings.include_crds {
            for crd in &out.crds {
                push_document(&mut manifest, None, crd);
            }
        }
        for doc in &out.documents {
            push_document(&mut manifest, Some(&doc.source), &doc.content);
        }

        // Additional files never stand in for an empty render
        if !has_content(&manifest) {
            return Err(EngineError::EmptyManifest { chart: chart_name });
        }

        Ok(RenderedRelease {
            release_name,
            namespace: settings.namespace.clone(),
            chart: chart_name,
            manifest,
            crds: out.crds,
            additional: settings.additional_files.clone(),
            notes: out.notes,
            documents: out.documents,
        })
    }

    fn render_recursive(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
        prefix: &str,
        depth: usize,
        cancel: &CancellationToken,
        out: &mut Collected,
    ) -> Result<()> {
        if depth > MAX_SUBCHART_DEPTH {
            tracing::warn!(chart = %chart.name(), "maximum subchart depth exceeded, stopping");
            return Ok(());
        }

        let parent_values = Values(context.values.clone());
        for subchart in discover_subcharts(chart, &context.values) {
            if !subchart.enabled {
                tracing::debug!(subchart = %subchart.name, "subchart disabled by condition");
                continue;
            }
            ensure_active(cancel, chart.name())?;

            let scoped = Values::for_subchart(
                subchart.chart.default_values()?,
                &parent_values,
                &subchart.name,
            );
            let sub_context =
                TemplateContext::new(scoped, context.release.clone(), &subchart.chart.metadata)
                    .with_capabilities(context.capabilities.clone());
            let dir_name = subchart
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| subchart.name.clone());
            let sub_prefix = format!("{}/charts/{}", prefix, dir_name);

            self.render_recursive(
                &subchart.chart,
                &sub_context,
                &sub_prefix,
                depth + 1,
                cancel,
                out,
            )?;
        }

        for crd in chart.crd_files()? {
            out.crds.push(std::fs::read_to_string(crd)?);
        }

        let result = self.engine.render_chart(chart, context, cancel)?;
        for (name, content) in result.manifests {
            out.documents.push(RenderedDocument {
                source: format!("{}/templates/{}", prefix, name),
                content,
            });
        }
        if depth == 0 {
            out.notes = result.notes;
        }

        Ok(())
    }
}

#[derive(Default)]
struct Collected {
    documents: Vec<RenderedDocument>,
    crds: Vec<String>,
    notes: Option<String>,
}

fn ensure_active(cancel: &CancellationToken, chart: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled {
            chart: chart.to_string(),
        })
    } else {
        Ok(())
    }
}

fn push_document(manifest: &mut String, source: Option<&str>, content: &str) {
    manifest.push_str("---\n");
    if let Some(source) = source {
        manifest.push_str("# Source: ");
        manifest.push_str(source);
        manifest.push('\n');
    }
    manifest.push_str(content.trim_matches('\n'));
    manifest.push('\n');
}

/// Whether the text holds anything besides separators, blanks and comments
fn has_content(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#') && line != "---"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_release_name() {
        assert!(validate_release_name("web").is_ok());
        assert!(validate_release_name("web-1.prod").is_ok());
        assert!(validate_release_name(PLACEHOLDER_RELEASE_NAME).is_ok());

        for bad in ["", "Web", "-web", "web-", "web_app", &"a".repeat(54)] {
            assert!(
                matches!(
                    validate_release_name(bad),
                    Err(EngineError::InvalidReleaseName { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_has_content() {
        assert!(!has_content(""));
        assert!(!has_content("---\n# Source: a\n\n---\n"));
        assert!(has_content("---\nkind: A\n"));
    }

    #[test]
    fn test_push_document() {
        let mut manifest = String::new();
        push_document(&mut manifest, Some("c/templates/a.yaml"), "\nkind: A\n\n");
        push_document(&mut manifest, None, "kind: B");
        assert_eq!(
            manifest,
            "---\n# Source: c/templates/a.yaml\nkind: A\n---\nkind: B\n"
        );
    }
}
