use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use super::{AudioOutputDestination, CreatedOutput, unique_display_name};
use crate::error::{Error, Result};

/// Subdirectory of the public base directory that receives all outputs.
pub const MEDIA_SUBDIRECTORY: &str = "VideoUtils";

const PENDING_PREFIX: &str = ".pending-";

/// Writes into `<base>/VideoUtils/` of a well-known user directory (Documents, Pictures).
///
/// Outputs are written under a hidden pending name and only appear under their display
/// name once committed, so a half-written file is never visible.
#[derive(Debug, Clone)]
pub struct MediaDirectory {
    base: PathBuf,
}

impl MediaDirectory {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base.join(MEDIA_SUBDIRECTORY)
    }
}

impl AudioOutputDestination for MediaDirectory {
    fn create(&self, display_name: &str, mime: &str) -> Result<CreatedOutput> {
        let dir = self.output_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::OutputCreate(format!("{}: {e}", dir.display())))?;

        let name = unique_display_name(display_name, |n| dir.join(n).exists());
        let final_path = dir.join(&name);
        let pending_path = dir.join(format!("{PENDING_PREFIX}{}-{name}", Uuid::new_v4()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&pending_path)
            .map_err(|e| Error::OutputCreate(format!("{}: {e}", pending_path.display())))?;

        debug!(pending = %pending_path.display(), mime, "created pending output");

        let commit = {
            let pending = pending_path.clone();
            let target = final_path.clone();
            move || publish(&pending, &target)
        };
        let rollback = move || fs::remove_file(&pending_path).map_err(Error::OutputWrite);

        Ok(CreatedOutput::new(name, final_path, file, commit, rollback))
    }

    fn label(&self) -> String {
        format!("{}/", self.output_dir().display())
    }
}

fn publish(pending: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        return Err(Error::OutputCreate(format!(
            "{} appeared while the output was being written",
            target.display()
        )));
    }
    fs::rename(pending, target)
        .map_err(|e| Error::OutputCreate(format!("{}: {e}", target.display())))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn visible_entries(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    #[test]
    fn output_is_hidden_until_commit() -> anyhow::Result<()> {
        let base = tempfile::tempdir()?;
        let dest = MediaDirectory::new(base.path());

        let mut out = dest.create("song.m4a", "audio/mp4")?;
        out.file.write_all(b"data")?;
        let final_path = out.output_path.clone();
        assert_eq!(final_path, base.path().join("VideoUtils/song.m4a"));
        assert!(!final_path.exists());

        out.commit()?;
        assert_eq!(fs::read(&final_path)?, b"data");
        assert_eq!(visible_entries(&dest.output_dir())?, vec!["song.m4a"]);
        Ok(())
    }

    #[test]
    fn rollback_leaves_nothing_behind() -> anyhow::Result<()> {
        let base = tempfile::tempdir()?;
        let dest = MediaDirectory::new(base.path());

        dest.create("song.mp3", "audio/mpeg")?.rollback()?;
        assert!(visible_entries(&dest.output_dir())?.is_empty());
        Ok(())
    }

    #[test]
    fn existing_files_are_never_overwritten() -> anyhow::Result<()> {
        let base = tempfile::tempdir()?;
        let dest = MediaDirectory::new(base.path());
        fs::create_dir_all(dest.output_dir())?;
        fs::write(dest.output_dir().join("song.m4a"), b"old")?;

        let out = dest.create("song.m4a", "audio/mp4")?;
        assert_eq!(out.display_name, "song_1.m4a");
        out.commit()?;

        assert_eq!(fs::read(dest.output_dir().join("song.m4a"))?, b"old");
        Ok(())
    }
}
