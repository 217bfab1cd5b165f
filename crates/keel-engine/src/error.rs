//! Engine error types

use keel_core::CoreError;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::filters::AVAILABLE_FILTERS;

/// Rendering failures
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error: {0}")]
    Template(Box<TemplateError>),

    /// Chart loading, value merging or manifest parsing failed
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Rendering chart {chart} produced an empty manifest")]
    EmptyManifest { chart: String },

    #[error("Invalid release name '{name}': {reason}")]
    InvalidReleaseName { name: String, reason: String },

    #[error("Rendering of {chart} was cancelled")]
    Cancelled { chart: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TemplateError> for EngineError {
    fn from(err: TemplateError) -> Self {
        Self::Template(Box::new(err))
    }
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    InvalidOutput,
    Other,
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{template}: {message}")]
#[diagnostic(code(keel::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Template path, prefixed with the chart name
    pub template: String,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Wrap a MiniJinja error with its template source
    pub fn from_minijinja(err: minijinja::Error, template: &str, source: &str) -> Self {
        let kind = categorize(&err);
        let span = err.line().and_then(|line| calculate_span(source, line));
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };

        Self {
            suggestion: suggest(kind, &message),
            message,
            kind,
            template: template.to_string(),
            src: NamedSource::new(template, source.to_string()),
            span,
        }
    }

    /// Rendered output that is not a valid resource document
    pub fn invalid_output(template: &str, rendered: &str, cause: impl std::fmt::Display) -> Self {
        Self {
            message: cause.to_string(),
            kind: TemplateErrorKind::InvalidOutput,
            template: template.to_string(),
            src: NamedSource::new(template, rendered.to_string()),
            span: None,
            suggestion: Some(
                "Every rendered document needs a `kind` and a `metadata.name`".to_string(),
            ),
        }
    }

    /// Create an error without source mapping
    pub fn simple(template: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            template: template.to_string(),
            src: NamedSource::new(template, String::new()),
            span: None,
            suggestion: None,
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    use minijinja::ErrorKind;

    match err.kind() {
        ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        ErrorKind::NonPrimitive | ErrorKind::NonKey => TemplateErrorKind::TypeError,
        _ => TemplateErrorKind::Other,
    }
}

fn suggest(kind: TemplateErrorKind, message: &str) -> Option<String> {
    match kind {
        TemplateErrorKind::UndefinedVariable => Some(
            "Check the key exists in values.yaml, or guard it with `is defined` / `| default(...)`"
                .to_string(),
        ),
        TemplateErrorKind::UnknownFilter => Some(format!(
            "Available filters besides the builtins: {}",
            AVAILABLE_FILTERS.join(", ")
        )),
        TemplateErrorKind::SyntaxError if message.contains('}') || message.contains('%') => Some(
            "Check bracket matching: `{{ }}` for expressions, `{% %}` for statements".to_string(),
        ),
        _ => None,
    }
}

/// Span covering the given 1-based line
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (index, line) in source.lines().enumerate() {
        if index + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
