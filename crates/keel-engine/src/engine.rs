//! Template engine based on MiniJinja

use indexmap::IndexMap;
use keel_core::{LoadedChart, TemplateContext, TemplateInfo};
use minijinja::Environment;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// Name of the post-install notes template
pub const NOTES_TEMPLATE: &str = "NOTES.txt";

/// Result of rendering a single chart's templates
#[derive(Debug, Default)]
pub struct RenderResult {
    /// Rendered output by template path relative to `templates/`, in file order
    pub manifests: IndexMap<String, String>,

    /// Post-install notes (if NOTES.txt exists)
    pub notes: Option<String>,
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.strict_mode {
            minijinja::UndefinedBehavior::Strict
        } else {
            minijinja::UndefinedBehavior::Lenient
        });
        // Output is YAML, never HTML or JSON escaped
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);
        // Keep the trailing newline of every template so documents concatenate cleanly
        env.set_keep_trailing_newline(true);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("sha256", filters::sha256sum);

        env.add_function("fail", filters::fail);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;

        let tmpl = env
            .get_template(template_name)
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;

        tmpl.render(context_value(context, &context.template))
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template).into())
    }

    /// Render every template of a chart
    ///
    /// All files under `templates/` are loaded so helpers can be included or
    /// imported; files whose name starts with `_` are not emitted. Output
    /// that renders to nothing is dropped. Cancellation is checked before
    /// each template.
    pub fn render_chart(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
        cancel: &CancellationToken,
    ) -> Result<RenderResult> {
        let template_files = chart.template_files()?;
        let base_path = format!("{}/templates", chart.name());

        let mut env = self.create_environment();
        let mut sources = IndexMap::new();

        for file_path in &template_files {
            let rel_path = file_path
                .strip_prefix(&chart.templates_dir)
                .unwrap_or(file_path);
            let name = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read_to_string(file_path)?;

            env.add_template_owned(name.clone(), content.clone())
                .map_err(|e| {
                    TemplateError::from_minijinja(e, &format!("{}/{}", base_path, name), &content)
                })?;
            sources.insert(name, content);
        }

        let mut result = RenderResult::default();

        for (name, source) in &sources {
            let is_helper = name
                .rsplit('/')
                .next()
                .is_some_and(|file| file.starts_with('_'));
            if is_helper {
                continue;
            }

            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    chart: chart.name().to_string(),
                });
            }

            let full_name = format!("{}/{}", base_path, name);
            let info = TemplateInfo {
                name: full_name.clone(),
                base_path: base_path.clone(),
            };

            let rendered = env
                .get_template(name)
                .and_then(|tmpl| tmpl.render(context_value(context, &info)))
                .map_err(|e| TemplateError::from_minijinja(e, &full_name, source))?;

            if name.eq_ignore_ascii_case(NOTES_TEMPLATE) {
                result.notes = Some(rendered);
                continue;
            }

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                tracing::trace!(template = %full_name, "template rendered empty");
                continue;
            }

            let output_name = name.trim_end_matches(".j2").to_string();
            result.manifests.insert(output_name, rendered);
        }

        Ok(result)
    }
}

fn context_value(context: &TemplateContext, template: &TemplateInfo) -> minijinja::Value {
    minijinja::context! {
        values => &context.values,
        release => &context.release,
        chart => &context.chart,
        capabilities => &context.capabilities,
        template => template,
    }
}
