//! Chart archive extraction

use flate2::read::GzDecoder;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use crate::error::{RepoError, Result};

/// Extract a `.tgz` chart archive into `dest`
///
/// Chart archives hold a single top-level directory named after the chart;
/// that directory is stripped so `dest` becomes the chart root. Entries that
/// would escape `dest` are rejected and links are skipped.
pub fn extract_chart(data: &[u8], dest: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(data));
    std::fs::create_dir_all(dest)?;

    let mut extracted = 0usize;
    for entry in archive.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        let path = entry.path().map_err(invalid)?.into_owned();

        let Some(relative) = strip_top_level(&path)? else {
            continue;
        };
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => std::fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(invalid)?;
                extracted += 1;
            }
            other => {
                tracing::debug!(path = %path.display(), kind = ?other, "skipping archive entry");
            }
        }
    }

    if extracted == 0 {
        return Err(RepoError::InvalidArchive {
            message: "archive contains no files".to_string(),
        });
    }
    Ok(())
}

/// Drop the leading directory; `None` for the directory entry itself
fn strip_top_level(path: &Path) -> Result<Option<PathBuf>> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part),
            Component::CurDir => {}
            _ => {
                return Err(RepoError::InvalidArchive {
                    message: format!("unsafe path in archive: {}", path.display()),
                });
            }
        }
    }

    if components.len() < 2 {
        return Ok(None);
    }
    Ok(Some(components[1..].iter().collect()))
}

fn invalid(e: std::io::Error) -> RepoError {
    RepoError::InvalidArchive {
        message: e.to_string(),
    }
}
