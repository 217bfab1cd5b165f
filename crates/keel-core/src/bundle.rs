//! In-memory chart bundles and their export to disk

use std::path::{Component, Path, PathBuf};

use crate::chart::{CHART_FILE, CHARTS_DIR, CRDS_DIR, ChartMetadata, LoadedChart, TEMPLATES_DIR, VALUES_FILE};
use crate::error::{CoreError, Result};
use crate::resource::{ResourceDir, ResourceDocument};
use crate::values::Values;
use crate::workdir::WorkDir;

/// A file carried by a bundle, addressed by a relative `/`-separated path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: String,
    pub content: String,
}

impl BundleFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A chart held in memory
///
/// Templates and CRDs are addressed relative to `templates/` and `crds/`.
/// Additional files are raw resources addressed relative to the chart root;
/// they are never templated and are emitted ahead of the rendered manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartBundle {
    pub metadata: ChartMetadata,
    pub values: Values,
    pub templates: Vec<BundleFile>,
    pub crds: Vec<BundleFile>,
    pub additional_files: Vec<BundleFile>,
    pub dependencies: Vec<ChartBundle>,
}

impl ChartBundle {
    pub fn new(metadata: ChartMetadata) -> Self {
        Self {
            metadata,
            values: Values::new(),
            templates: Vec::new(),
            crds: Vec::new(),
            additional_files: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Chart name, also the default release name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_template(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.templates.push(BundleFile::new(path, content));
        self
    }

    pub fn with_crd(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.crds.push(BundleFile::new(path, content));
        self
    }

    pub fn with_additional_file(
        mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.additional_files.push(BundleFile::new(path, content));
        self
    }

    pub fn with_dependency(mut self, dependency: ChartBundle) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Place an already-rendered resource by kind
    ///
    /// CustomResourceDefinitions go to `crds/`, everything else to
    /// `templates/`, named `<lowercased-kind>-<name>.yaml`. Two resources
    /// mapping to the same file are rejected.
    pub fn add_resource(&mut self, resource: &ResourceDocument) -> Result<()> {
        let file_name = resource.file_name();
        let target = match resource.placement() {
            ResourceDir::Crds => &mut self.crds,
            ResourceDir::Templates => &mut self.templates,
        };

        if target.iter().any(|f| f.path == file_name) {
            return Err(CoreError::Parse {
                message: format!(
                    "duplicate resource {} maps to existing file {}",
                    resource.display_name(),
                    resource.chart_path()
                ),
            });
        }

        target.push(BundleFile::new(file_name, resource.content.clone()));
        Ok(())
    }

    /// Contents of the additional raw files, in declared order
    pub fn additional_manifests(&self) -> Vec<String> {
        self.additional_files
            .iter()
            .map(|f| f.content.clone())
            .collect()
    }

    /// Write the chart into `target_dir`
    ///
    /// `crds/` and `templates/` are always created, even when empty.
    /// Sub-bundles are written under `charts/<name>/`.
    pub fn export(&self, target_dir: &Path) -> Result<()> {
        self.metadata.validate()?;

        let templates_dir = target_dir.join(TEMPLATES_DIR);
        let crds_dir = target_dir.join(CRDS_DIR);
        std::fs::create_dir_all(&templates_dir)?;
        std::fs::create_dir_all(&crds_dir)?;

        std::fs::write(target_dir.join(CHART_FILE), self.metadata.to_yaml()?)?;
        std::fs::write(target_dir.join(VALUES_FILE), self.values.to_yaml()?)?;

        for file in &self.templates {
            write_file(&templates_dir, file)?;
        }
        for file in &self.crds {
            write_file(&crds_dir, file)?;
        }
        for file in &self.additional_files {
            write_file(target_dir, file)?;
        }

        if !self.dependencies.is_empty() {
            let charts_dir = target_dir.join(CHARTS_DIR);
            for dependency in &self.dependencies {
                dependency.export(&charts_dir.join(dependency.name()))?;
            }
        }

        tracing::debug!(
            chart = %self.metadata.name,
            dir = %target_dir.display(),
            templates = self.templates.len(),
            crds = self.crds.len(),
            "exported chart"
        );
        Ok(())
    }

    /// Export into a fresh scoped directory named after the chart
    pub fn export_temp(&self) -> Result<WorkDir> {
        let dir = WorkDir::new(self.name())?;
        self.export(dir.path())?;
        Ok(dir)
    }

    /// Read a chart directory back into a bundle
    ///
    /// Files outside `templates/`, `crds/` and `charts/` are not picked up,
    /// so the loaded bundle carries no additional files.
    pub fn load(dir: &Path) -> Result<Self> {
        let chart = LoadedChart::load(dir)?;

        let mut bundle = ChartBundle::new(chart.metadata.clone())
            .with_values(chart.default_values()?);

        bundle.templates = read_tree(&chart.templates_dir)?;
        if let Some(crds_dir) = &chart.crds_dir {
            bundle.crds = read_tree(crds_dir)?;
        }
        for subchart in chart.subchart_dirs()? {
            bundle.dependencies.push(ChartBundle::load(&subchart)?);
        }

        Ok(bundle)
    }
}

fn write_file(base: &Path, file: &BundleFile) -> Result<()> {
    let path = base.join(safe_relative(&file.path)?);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &file.content)?;
    Ok(())
}

/// Reject absolute paths and `..` so bundle files stay inside the chart
fn safe_relative(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let valid = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if valid {
        Ok(candidate.to_path_buf())
    } else {
        Err(CoreError::InvalidChart {
            message: format!("file path '{}' escapes the chart directory", path),
        })
    }
}

fn read_tree(dir: &Path) -> Result<Vec<BundleFile>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(BundleFile::new(path, std::fs::read_to_string(entry.path())?));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::split_manifest;
    use semver::Version;
    use std::collections::BTreeMap;

    fn sample_bundle() -> ChartBundle {
        let redis = ChartBundle::new(ChartMetadata::new("redis", Version::new(7, 0, 0)))
            .with_template("deployment.yaml", "kind: Deployment\n");

        ChartBundle::new(ChartMetadata::new("web", Version::new(1, 2, 3)))
            .with_values(Values::from_yaml("replicas: 2\nimage:\n  tag: v1\n").unwrap())
            .with_template("deployment.yaml", "replicas: {{ values.replicas }}\n")
            .with_template("nested/service.yaml", "kind: Service\n")
            .with_additional_file("extra/config.yaml", "kind: ConfigMap\n")
            .with_dependency(redis)
    }

    fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().to_string();
                (rel, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_export_layout() {
        let dir = tempfile::tempdir().unwrap();
        sample_bundle().export(dir.path()).unwrap();

        let root = dir.path();
        assert!(root.join("crds").is_dir());
        assert!(root.join("templates/nested/service.yaml").is_file());
        assert!(root.join("extra/config.yaml").is_file());
        assert!(root.join("charts/redis/Chart.yaml").is_file());
        assert!(root.join("charts/redis/crds").is_dir());
        assert_eq!(
            std::fs::read_to_string(root.join("Chart.yaml")).unwrap(),
            "apiVersion: v2\nname: web\nversion: 1.2.3\n"
        );
    }

    #[test]
    fn test_export_empty_bundle_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        ChartBundle::new(ChartMetadata::new("empty", Version::new(0, 1, 0)))
            .export(dir.path())
            .unwrap();

        assert!(dir.path().join("crds").is_dir());
        assert!(dir.path().join("templates").is_dir());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("values.yaml")).unwrap(),
            "{}\n"
        );
    }

    #[test]
    fn test_export_is_idempotent() {
        let bundle = sample_bundle();
        let first = bundle.export_temp().unwrap();
        let second = bundle.export_temp().unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(snapshot(first.path()), snapshot(second.path()));
    }

    #[test]
    fn test_export_temp_is_removed_on_drop() {
        let dir = sample_bundle().export_temp().unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.join("Chart.yaml").exists());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_export_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ChartBundle::new(ChartMetadata::new("bad", Version::new(0, 1, 0)))
            .with_template("../outside.yaml", "x");
        assert!(matches!(
            bundle.export(dir.path()),
            Err(CoreError::InvalidChart { .. })
        ));
    }

    #[test]
    fn test_export_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ChartBundle::new(ChartMetadata::new("", Version::new(0, 1, 0)));
        assert!(matches!(
            bundle.export(dir.path()),
            Err(CoreError::MissingField { .. })
        ));
    }

    #[test]
    fn test_add_resource_placement_and_collision() {
        let docs = split_manifest(
            "kind: CustomResourceDefinition\nmetadata:\n  name: a.example.com\n---\nkind: Service\nmetadata:\n  name: web\n",
        )
        .unwrap();

        let mut bundle = ChartBundle::new(ChartMetadata::new("pkg", Version::new(0, 1, 0)));
        for doc in &docs {
            bundle.add_resource(doc).unwrap();
        }

        assert_eq!(bundle.crds[0].path, "customresourcedefinition-a.example.com.yaml");
        assert_eq!(bundle.templates[0].path, "service-web.yaml");

        let err = bundle.add_resource(&docs[1]).unwrap_err();
        assert!(matches!(err, CoreError::Parse { message } if message.contains("duplicate")));
    }

    #[test]
    fn test_load_reads_back_export() {
        let bundle = sample_bundle();
        let dir = bundle.export_temp().unwrap();

        let loaded = ChartBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.metadata, bundle.metadata);
        assert_eq!(loaded.values, bundle.values);
        assert_eq!(loaded.templates, bundle.templates);
        assert_eq!(loaded.dependencies.len(), 1);
        assert_eq!(loaded.dependencies[0].name(), "redis");
        assert!(loaded.additional_files.is_empty());
    }
}
