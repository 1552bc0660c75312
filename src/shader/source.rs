//! Shader source files and change detection
//!
//! A [`ShaderSource`] remembers which file a stage was built from and the
//! modification time observed when it was built. [`SourceTracker`] compares
//! that against a fresh stat using exact equality, so any difference,
//! including clock-resolution artifacts, counts as a change.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{backend::StageKind, error::ShaderError};

/// File access the tracker needs
pub trait FileSystem {
    fn read_text(&self, path: &Path) -> io::Result<String>;
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read_text(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }
}

/// Identity of one shader stage's backing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub kind: StageKind,
    pub path: PathBuf,
    pub last_modified: SystemTime,
}

/// A source together with the text read for it
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub source: ShaderSource,
    pub text: String,
}

/// Stats and reads shader files through a [`FileSystem`]
#[derive(Debug, Default, Clone)]
pub struct SourceTracker<F = StdFileSystem> {
    fs: F,
}

impl<F: FileSystem> SourceTracker<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    pub fn file_system(&self) -> &F {
        &self.fs
    }

    /// Current modification time of `path`
    pub fn observe(&self, path: &Path) -> Result<SystemTime, ShaderError> {
        self.fs
            .modified(path)
            .map_err(|err| ShaderError::io(path, err))
    }

    /// True when the file's modification time differs from the stored one
    pub fn has_changed(&self, source: &ShaderSource) -> Result<bool, ShaderError> {
        Ok(self.observe(&source.path)? != source.last_modified)
    }

    pub fn read_text(&self, path: &Path) -> Result<String, ShaderError> {
        self.fs
            .read_text(path)
            .map_err(|err| ShaderError::io(path, err))
    }

    /// Stat then read `path`
    ///
    /// The timestamp is taken before the read, so a write racing with the
    /// read leaves a newer timestamp on disk and is seen by the next poll.
    pub fn load(
        &self,
        kind: StageKind,
        path: impl AsRef<Path>,
    ) -> Result<LoadedSource, ShaderError> {
        let path = path.as_ref();
        let last_modified = self.observe(path)?;
        let text = self.read_text(path)?;
        log::debug!("Loaded {} shader source {}", kind, path.display());

        Ok(LoadedSource {
            source: ShaderSource {
                kind,
                path: path.to_path_buf(),
                last_modified,
            },
            text,
        })
    }
}
