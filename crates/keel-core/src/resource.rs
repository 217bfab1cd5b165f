//! Parsed Kubernetes resource documents

use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Kind of the cluster-scoped schema resource that lives under `crds/`
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Chart subdirectory a resource belongs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDir {
    Crds,
    Templates,
}

impl ResourceDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crds => crate::chart::CRDS_DIR,
            Self::Templates => crate::chart::TEMPLATES_DIR,
        }
    }
}

/// A single resource document from a manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// Document text as it appeared in the manifest
    pub content: String,
    /// Parsed document
    pub object: JsonValue,
}

impl ResourceDocument {
    /// Parse a single YAML document
    pub fn parse(doc: &str) -> Result<Self> {
        let object: JsonValue = serde_yaml::from_str(doc)
            .map_err(|e| CoreError::parse(format!("malformed YAML: {}", e)))?;

        if !object.is_object() {
            return Err(CoreError::parse("document is not a mapping"));
        }

        let field = |pointer: &str| object.pointer(pointer).and_then(JsonValue::as_str);

        let kind = field("/kind")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::parse("document has no kind"))?
            .to_string();
        let name = field("/metadata/name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CoreError::parse(format!("{} has no metadata.name", kind)))?
            .to_string();
        let api_version = field("/apiVersion").unwrap_or_default().to_string();
        let namespace = field("/metadata/namespace").map(str::to_string);

        let mut content = doc.trim().to_string();
        content.push('\n');

        Ok(Self {
            api_version,
            kind,
            name,
            namespace,
            content,
            object,
        })
    }

    /// Whether this resource is a CustomResourceDefinition
    pub fn is_crd(&self) -> bool {
        self.kind == CRD_KIND
    }

    /// Chart subdirectory this resource is written to
    pub fn placement(&self) -> ResourceDir {
        if self.is_crd() {
            ResourceDir::Crds
        } else {
            ResourceDir::Templates
        }
    }

    /// File name used when packaging: `<lowercased-kind>-<name>.yaml`
    pub fn file_name(&self) -> String {
        format!("{}-{}.yaml", self.kind.to_lowercase(), self.name)
    }

    /// Relative path inside a chart: `crds/...` or `templates/...`
    pub fn chart_path(&self) -> String {
        format!("{}/{}", self.placement().as_str(), self.file_name())
    }

    /// `Kind/name` (or `namespace/Kind/name`) for messages
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }
}

/// Split a multi-document manifest into resources
///
/// Empty and comment-only documents are skipped. Any other document that
/// cannot be parsed or lacks a kind or name fails the whole split.
pub fn split_manifest(manifest: &str) -> Result<Vec<ResourceDocument>> {
    let mut resources = Vec::new();

    for (index, doc) in split_documents(manifest).into_iter().enumerate() {
        if is_blank(&doc) {
            continue;
        }
        let resource = ResourceDocument::parse(&doc).map_err(|e| match e {
            CoreError::Parse { message } => CoreError::Parse {
                message: format!("document {}: {}", index, message),
            },
            other => other,
        })?;
        resources.push(resource);
    }

    Ok(resources)
}

/// Split on YAML document separators (`---` at the start of a line)
fn split_documents(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        let is_separator = line.trim_end() == "---" || line.starts_with("--- ");
        if is_separator {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);
    docs
}

fn is_blank(doc: &str) -> bool {
    doc.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}
