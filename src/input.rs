// src/input.rs

//! Input resolution and output naming.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// An input file that exists and can be read, plus the name shown for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub display_name: String,
}

/// Check that `path` names a readable file and derive its display name.
///
/// The display name is the file name, falling back to the full path.
pub fn resolve_input(path: &Path) -> Result<ResolvedInput> {
    let meta = std::fs::metadata(path)
        .map_err(|e| Error::SourceOpen(format!("{}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(Error::SourceOpen(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| path.display().to_string());

    Ok(ResolvedInput {
        path: path.to_path_buf(),
        display_name,
    })
}

/// Output base name for an input: its display name minus the last extension.
///
/// Missing or blank names fall back to `audio_<unix-millis>`.
pub fn output_base_name(display_name: Option<&str>) -> String {
    let stem = display_name
        .map(|name| name.rsplit_once('.').map_or(name, |(base, _)| base))
        .filter(|stem| !stem.trim().is_empty());

    match stem {
        Some(stem) => stem.to_owned(),
        None => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            format!("audio_{millis}")
        }
    }
}
