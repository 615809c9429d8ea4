//! Output destinations.
//!
//! A destination creates one writable file per extraction attempt and later either commits
//! or rolls it back. The caller must close the file before either happens, which
//! [`CreatedOutput::commit`] and [`CreatedOutput::rollback`] enforce by consuming the output.

mod custom_tree;
mod media_dir;

use std::fs::File;
use std::path::PathBuf;

use tracing::error;

use crate::error::Result;

pub use custom_tree::CustomTree;
pub use media_dir::{MEDIA_SUBDIRECTORY, MediaDirectory};

type Finish = Box<dyn FnOnce() -> Result<()>>;

/// Somewhere extracted audio files can be written.
pub trait AudioOutputDestination {
    /// Create a new output named after `display_name`, made unique within the destination.
    fn create(&self, display_name: &str, mime: &str) -> Result<CreatedOutput>;

    /// Human-readable description of where outputs end up.
    fn label(&self) -> String;
}

/// A freshly created output. Exactly one of `commit` or `rollback` must be called.
pub struct CreatedOutput {
    pub display_name: String,
    pub output_path: PathBuf,
    pub file: File,
    commit: Finish,
    rollback: Finish,
}

impl CreatedOutput {
    pub fn new(
        display_name: impl Into<String>,
        output_path: impl Into<PathBuf>,
        file: File,
        commit: impl FnOnce() -> Result<()> + 'static,
        rollback: impl FnOnce() -> Result<()> + 'static,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            output_path: output_path.into(),
            file,
            commit: Box::new(commit),
            rollback: Box::new(rollback),
        }
    }

    /// Close the file and publish it.
    ///
    /// If publishing fails the output is rolled back before the error is returned.
    pub fn commit(self) -> Result<()> {
        let Self {
            file,
            commit,
            rollback,
            display_name,
            ..
        } = self;
        drop(file);

        commit().inspect_err(|_| {
            if let Err(err) = rollback() {
                error!(output = %display_name, error = %err, "rollback after failed commit failed");
            }
        })
    }

    /// Close the file and discard it.
    pub fn rollback(self) -> Result<()> {
        let Self { file, rollback, .. } = self;
        drop(file);
        rollback()
    }
}

impl std::fmt::Debug for CreatedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedOutput")
            .field("display_name", &self.display_name)
            .field("output_path", &self.output_path)
            .finish_non_exhaustive()
    }
}

/// First name in `desired`, `base_1.ext`, `base_2.ext`, ... for which `exists` is false.
///
/// The extension is everything after the last `.`; names without one get a bare suffix.
pub fn unique_display_name(desired: &str, exists: impl Fn(&str) -> bool) -> String {
    if !exists(desired) {
        return desired.to_owned();
    }

    let (base, ext) = match desired.rsplit_once('.') {
        Some((base, ext)) if !ext.trim().is_empty() => (base, Some(ext)),
        Some((base, _)) => (base, None),
        None => (desired, None),
    };

    (1u64..)
        .map(|index| match ext {
            Some(ext) => format!("{base}_{index}.{ext}"),
            None => format!("{base}_{index}"),
        })
        .find(|candidate| !exists(candidate))
        .unwrap_or_else(|| desired.to_owned())
}
