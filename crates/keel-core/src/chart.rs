//! Chart definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Name of the chart metadata file
pub const CHART_FILE: &str = "Chart.yaml";

/// Name of the default values file
pub const VALUES_FILE: &str = "values.yaml";

/// Directory holding materialized sub-chart dependencies
pub const CHARTS_DIR: &str = "charts";

/// Directory holding templates
pub const TEMPLATES_DIR: &str = "templates";

/// Directory holding cluster-scoped schema resources
pub const CRDS_DIR: &str = "crds";

/// Chart metadata, as stored in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// API version (v2)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Chart type
    #[serde(default, rename = "type", skip_serializing_if = "ChartKind::is_application")]
    pub kind: ChartKind,

    /// Keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Sub-chart dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

impl ChartMetadata {
    /// Create metadata with the given name and version
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            api_version: default_api_version(),
            name: name.into(),
            version,
            description: None,
            app_version: None,
            kind: ChartKind::default(),
            keywords: Vec::new(),
            annotations: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Parse metadata from a `Chart.yaml` document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let metadata: Self = serde_yaml::from_str(yaml)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Serialize to a `Chart.yaml` document
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the invariants every chart must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::MissingField {
                field: "name".to_string(),
            });
        }
        if !matches!(self.api_version.as_str(), "v1" | "v2") {
            return Err(CoreError::InvalidChart {
                message: format!(
                    "Unsupported API version: {}. Expected: v2",
                    self.api_version
                ),
            });
        }
        Ok(())
    }
}

/// Chart type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Application,
    Library,
}

impl ChartKind {
    fn is_application(&self) -> bool {
        matches!(self, Self::Application)
    }
}

/// Chart dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency name
    pub name: String,

    /// Version constraint (semver)
    #[serde(default = "default_version_constraint")]
    pub version: String,

    /// Where to fetch it from: a repository URL, `oci://` reference,
    /// `file://` path or `@alias` of a configured repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    /// Static enable/disable flag
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Dot-separated path evaluated against values at render time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Tags for conditional inclusion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Alias name (overrides dependency name in templates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

fn default_version_constraint() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

impl Dependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Check whether this dependency takes part in rendering
    ///
    /// `enabled: false` always wins; otherwise the condition (if any) is
    /// evaluated against the parent values. A condition path that does not
    /// exist counts as enabled, matching how charts ship optional toggles.
    pub fn is_enabled(&self, values: &serde_json::Value) -> bool {
        if !self.enabled {
            return false;
        }

        let Some(condition) = &self.condition else {
            return true;
        };

        // Helm allows a comma separated list; the first path that resolves wins
        for path in condition.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(value) = lookup(values, path) {
                return truthy(value);
            }
        }
        true
    }
}

/// Evaluate a simple dot-path condition against values
///
/// Returns `true` if the path exists and is truthy.
pub fn evaluate_condition(condition: &str, values: &serde_json::Value) -> bool {
    lookup(values, condition).map(truthy).unwrap_or(false)
}

fn lookup<'a>(values: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = values;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Loaded chart with resolved paths
#[derive(Debug, Clone)]
pub struct LoadedChart {
    /// Chart metadata
    pub metadata: ChartMetadata,

    /// Root directory of the chart
    pub root: PathBuf,

    /// Templates directory
    pub templates_dir: PathBuf,

    /// CRDs directory (if present)
    pub crds_dir: Option<PathBuf>,

    /// Values file path
    pub values_path: PathBuf,

    /// Materialized dependencies directory
    pub charts_dir: PathBuf,
}

impl LoadedChart {
    /// Load a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join(CHART_FILE);
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("{} not found in {}", CHART_FILE, root.display()),
            });
        }

        let content = std::fs::read_to_string(&chart_file)?;
        let metadata = ChartMetadata::from_yaml(&content)?;

        let crds_dir = Some(root.join(CRDS_DIR)).filter(|dir| dir.is_dir());

        Ok(Self {
            metadata,
            templates_dir: root.join(TEMPLATES_DIR),
            values_path: root.join(VALUES_FILE),
            charts_dir: root.join(CHARTS_DIR),
            crds_dir,
            root,
        })
    }

    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Load the chart's default values (empty if no values.yaml)
    pub fn default_values(&self) -> Result<Values> {
        if self.values_path.exists() {
            Values::from_file(&self.values_path)
        } else {
            Ok(Values::new())
        }
    }

    /// Whether dependencies have already been materialized under `charts/`
    pub fn has_materialized_dependencies(&self) -> bool {
        self.charts_dir.is_dir()
    }

    /// Get list of template files, sorted for deterministic rendering
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        collect_files(
            &self.templates_dir,
            &["yaml", "yml", "tpl", "txt", "json", "j2"],
        )
    }

    /// Get list of CRD files from crds/ directory
    pub fn crd_files(&self) -> Result<Vec<PathBuf>> {
        match &self.crds_dir {
            Some(dir) => collect_files(dir, &["yaml", "yml", "json"]),
            None => Ok(Vec::new()),
        }
    }

    /// Directories of the sub-charts materialized under `charts/`
    pub fn subchart_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.charts_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.charts_dir)? {
            let path = entry?.path();
            if path.is_dir() && path.join(CHART_FILE).exists() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

fn collect_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.exists() {
        return Ok(files);
    }

    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if extensions.contains(&ext.as_str()) {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Custom serde for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(s.trim_start_matches('v')).map_err(serde::de::Error::custom)
    }
}
