//! Subchart discovery

use std::collections::HashMap;
use std::path::PathBuf;

use keel_core::{Dependency, LoadedChart};
use serde_json::Value as JsonValue;

/// Maximum nesting of `charts/` directories followed while rendering
pub const MAX_SUBCHART_DEPTH: usize = 10;

/// A chart found under a parent's `charts/` directory
#[derive(Debug)]
pub struct SubchartInfo {
    /// Effective name (alias if set, otherwise the directory name)
    pub name: String,

    pub path: PathBuf,

    pub chart: LoadedChart,

    /// Whether the parent values enable it
    pub enabled: bool,

    /// Matching entry from the parent's `dependencies`, if any
    pub dependency: Option<Dependency>,
}

/// Find the subcharts of `chart` and evaluate their conditions
///
/// Directories without a loadable `Chart.yaml` are skipped with a warning.
/// The result is sorted by name.
pub fn discover_subcharts(chart: &LoadedChart, values: &JsonValue) -> Vec<SubchartInfo> {
    let deps_by_name: HashMap<&str, &Dependency> = chart
        .metadata
        .dependencies
        .iter()
        .flat_map(|d| [(d.name.as_str(), d), (d.effective_name(), d)])
        .collect();

    let dirs = match chart.subchart_dirs() {
        Ok(dirs) => dirs,
        Err(e) => {
            tracing::warn!(chart = %chart.name(), error = %e, "failed to read charts directory");
            return Vec::new();
        }
    };

    let mut subcharts = Vec::new();
    for path in dirs {
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };

        let loaded = match LoadedChart::load(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(subchart = %dir_name, error = %e, "skipping invalid subchart");
                continue;
            }
        };

        let dependency = deps_by_name
            .get(dir_name.as_str())
            .or_else(|| deps_by_name.get(loaded.name()))
            .map(|d| (*d).clone());

        let name = dependency
            .as_ref()
            .map(|d| d.effective_name().to_string())
            .unwrap_or(dir_name);

        // Subcharts with no matching dependency entry are always rendered
        let enabled = dependency
            .as_ref()
            .is_none_or(|d| d.is_enabled(values));

        subcharts.push(SubchartInfo {
            name,
            path,
            chart: loaded,
            enabled,
            dependency,
        });
    }

    subcharts.sort_by(|a, b| a.name.cmp(&b.name));
    subcharts
}
