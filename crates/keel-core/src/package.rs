//! Repackage rendered resources as an installable chart

use std::path::Path;

use crate::bundle::ChartBundle;
use crate::chart::ChartMetadata;
use crate::error::Result;
use crate::resource::split_manifest;
use crate::workdir::WorkDir;

/// Build a chart from already-rendered resource documents
///
/// Each input may hold several YAML documents. Every resource is written
/// as-is, so rendering the package reproduces the input resources.
pub fn package(metadata: &ChartMetadata, documents: &[String]) -> Result<WorkDir> {
    let bundle = bundle_from_documents(metadata, documents)?;
    bundle.export_temp()
}

/// Like [`package`], writing into an existing directory
pub fn package_into(dir: &Path, metadata: &ChartMetadata, documents: &[String]) -> Result<()> {
    bundle_from_documents(metadata, documents)?.export(dir)
}

fn bundle_from_documents(metadata: &ChartMetadata, documents: &[String]) -> Result<ChartBundle> {
    let mut bundle = ChartBundle::new(metadata.clone());

    for document in documents {
        for resource in split_manifest(document)? {
            bundle.add_resource(&resource)?;
        }
    }

    tracing::debug!(
        chart = %metadata.name,
        templates = bundle.templates.len(),
        crds = bundle.crds.len(),
        "packaged resources"
    );
    Ok(bundle)
}
