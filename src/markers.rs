//! Marker files let a setup script skip work it already did. A fresh run
//! removes them first.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerStatus {
    pub marker: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub exists: bool,
}

/// Deletes each existing marker under `dir` and returns the removed paths.
/// Markers that cannot be removed are logged and left in place.
pub fn remove_markers(dir: &Path, markers: &[String]) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    for marker in markers {
        let path = dir.join(marker);
        if !path.is_file() {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(marker = %path.display(), "marker removed");
                removed.push(path);
            }
            Err(err) => {
                tracing::warn!(marker = %path.display(), error = %err, "could not remove marker");
            }
        }
    }

    removed
}

/// Reports which of a setup's markers are currently present, in order.
pub fn check_markers(dir: &Path, markers: &[String]) -> Vec<MarkerStatus> {
    markers
        .iter()
        .map(|marker| {
            let path = dir.join(marker);
            MarkerStatus {
                marker: marker.clone(),
                exists: path.is_file(),
                path,
            }
        })
        .collect()
}
