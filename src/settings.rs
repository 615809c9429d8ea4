// src/settings.rs

//! Persisted user settings.
//!
//! Stored as pretty JSON. A missing file means "defaults"; a malformed one is an error
//! rather than being silently replaced.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::destination::{AudioOutputDestination, CustomTree, MediaDirectory};
use crate::error::{Error, Result};

pub const DOCUMENTS_DIR: &str = "Documents";
pub const PICTURES_DIR: &str = "Pictures";

/// Where extracted audio is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputDirectory {
    /// `<home>/Documents/VideoUtils/`
    #[default]
    DefaultDocuments,

    /// `<home>/Pictures/VideoUtils/`
    DefaultPictures,

    /// A user-chosen directory, written to directly.
    Custom { path: PathBuf },
}

impl OutputDirectory {
    /// Classify a directory the user picked.
    ///
    /// Anything inside `<home>/Documents` or `<home>/Pictures` maps to the matching default,
    /// so outputs still land in the shared `VideoUtils` folder.
    pub fn from_picked(path: &Path, home: &Path) -> Self {
        let top = path
            .strip_prefix(home)
            .ok()
            .and_then(|rest| rest.components().next());

        match top {
            Some(Component::Normal(dir)) if dir == DOCUMENTS_DIR => Self::DefaultDocuments,
            Some(Component::Normal(dir)) if dir == PICTURES_DIR => Self::DefaultPictures,
            _ => Self::Custom {
                path: path.to_path_buf(),
            },
        }
    }

    /// Build the destination this setting describes.
    pub fn destination(&self, home: &Path) -> Box<dyn AudioOutputDestination> {
        match self {
            Self::DefaultDocuments => Box::new(MediaDirectory::new(home.join(DOCUMENTS_DIR))),
            Self::DefaultPictures => Box::new(MediaDirectory::new(home.join(PICTURES_DIR))),
            Self::Custom { path } => Box::new(CustomTree::new(path)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub output_directory: OutputDirectory,
}

impl Settings {
    /// Default settings file: `<home>/.config/vidaudio/settings.json`.
    pub fn default_path(home: &Path) -> PathBuf {
        home.join(".config").join("vidaudio").join("settings.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Settings(format!("{}: {e}", path.display()))),
        };

        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Settings(format!("{}: {e}", parent.display())))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::Settings(format!("{}: {e}", path.display())))
    }

    /// Store a directory the user picked, collapsing shared folders to their default.
    pub fn pick_output_directory(&mut self, path: &Path, home: &Path) {
        self.output_directory = OutputDirectory::from_picked(path, home);
    }
}
