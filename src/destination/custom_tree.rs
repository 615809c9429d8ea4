use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing::debug;

use super::{AudioOutputDestination, CreatedOutput, unique_display_name};
use crate::error::{Error, Result};

/// Writes straight into a user-chosen directory.
///
/// Files appear under their final name immediately; commit is a no-op and rollback deletes
/// the file.
#[derive(Debug, Clone)]
pub struct CustomTree {
    dir: PathBuf,
}

impl CustomTree {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AudioOutputDestination for CustomTree {
    fn create(&self, display_name: &str, mime: &str) -> Result<CreatedOutput> {
        if !self.dir.is_dir() {
            return Err(Error::OutputCreate(format!(
                "{} is not an accessible directory",
                self.dir.display()
            )));
        }

        let name = unique_display_name(display_name, |n| self.dir.join(n).exists());
        let path = self.dir.join(&name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::OutputCreate(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), mime, "created output");

        let doomed = path.clone();
        Ok(CreatedOutput::new(
            name,
            path,
            file,
            || Ok(()),
            move || fs::remove_file(&doomed).map_err(Error::OutputWrite),
        ))
    }

    fn label(&self) -> String {
        match self.dir.file_name() {
            Some(name) => format!("Custom directory: {}", name.to_string_lossy()),
            None => "Custom directory".to_owned(),
        }
    }
}
