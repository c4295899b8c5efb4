use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::grouper::DuplicateGroups;

pub const DEFAULT_REPORT_FILE: &str = "duplicates.json";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Could not write report {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(DEFAULT_REPORT_FILE));
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `groups` as pretty JSON. The file only appears once fully written.
pub fn write_groups(path: &Path, groups: &DuplicateGroups) -> Result<(), ReportError> {
    let json = serde_json::to_string_pretty(groups)?;
    let staging = staging_path(path);

    fs::write(&staging, json).map_err(|source| ReportError::Io {
        path: staging.clone(),
        source,
    })?;
    if let Err(source) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(ReportError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    log::info!("Wrote {} groups to {}", groups.len(), path.display());
    Ok(())
}
