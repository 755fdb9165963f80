//! Artifact storage for snapshots, comparison records and diff images.
//!
//! Layout under the artifact root:
//!
//! ```text
//! {date}/snapshots/{file_name}                                            snapshot input
//! {date}/snapshots/{identifier}/{browser}_{upload}_{stage}.png            uploaded snapshot
//! {date}/snapshots/{identifier}/comparison_{stage}_{browser}.json         result record
//! {date}/snapshots/{identifier}/comparison_{base}_vs_{browser}_{stage}.png diff image
//! ```
//!
//! Every path is relative to the root and made of plain components only;
//! dates, identifiers and browser names are single components.

use crate::result::{CompararError, CompararResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Path computations for every artifact the service reads or writes
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactLayout;

impl ArtifactLayout {
    /// Check that `value` is usable as one path component
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for empty values, `.`/`..`, and anything
    /// containing a path separator or NUL.
    pub fn check_component(field: &str, value: &str) -> CompararResult<()> {
        let plain = !value.is_empty()
            && value != "."
            && value != ".."
            && !value.contains(['/', '\\', '\0']);
        if plain {
            Ok(())
        } else {
            Err(CompararError::invalid_path(field, value))
        }
    }

    /// Check that `path` is relative and made of plain components only
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for empty or absolute paths and paths with
    /// `.` or `..` components.
    pub fn check_relative(field: &str, path: &Path) -> CompararResult<()> {
        let mut components = path.components().peekable();
        let plain = components.peek().is_some()
            && components.all(|c| matches!(c, Component::Normal(_)));
        if plain {
            Ok(())
        } else {
            Err(CompararError::invalid_path(field, path.display().to_string()))
        }
    }

    /// Directory holding all snapshots of a run date
    #[must_use]
    pub fn snapshots_dir(date: &str) -> PathBuf {
        Path::new(date).join("snapshots")
    }

    /// Directory holding one identifier's artifacts
    #[must_use]
    pub fn identifier_dir(date: &str, identifier: &str) -> PathBuf {
        Self::snapshots_dir(date).join(identifier)
    }

    /// Where a submitted snapshot file lives
    #[must_use]
    pub fn snapshot_path(date: &str, file_name: &str) -> PathBuf {
        Self::snapshots_dir(date).join(file_name)
    }

    /// File name (relative to the snapshots dir) of an uploaded snapshot
    ///
    /// `upload` numbers the submission, so a resubmission never replaces
    /// files a running comparison may still read.
    #[must_use]
    pub fn upload_file_name(identifier: &str, browser: &str, upload: u64, stage: &str) -> String {
        format!("{identifier}/{browser}_{upload}_{stage}.png")
    }

    /// Result record for one compared pair
    #[must_use]
    pub fn result_path(date: &str, identifier: &str, stage: &str, browser: &str) -> PathBuf {
        Self::identifier_dir(date, identifier).join(format!("comparison_{stage}_{browser}.json"))
    }

    /// Rendered diff image for one compared pair
    #[must_use]
    pub fn diff_image_path(
        date: &str,
        identifier: &str,
        baseline: &str,
        browser: &str,
        stage: &str,
    ) -> PathBuf {
        Self::identifier_dir(date, identifier)
            .join(format!("comparison_{baseline}_vs_{browser}_{stage}.png"))
    }

    /// Stage labels for a baseline submission, one per file
    ///
    /// A file named `*before*` or `*after*` gives that label; anything
    /// else, and any label claimed by more than one file, falls back to
    /// `stage{index}` so labels stay unique.
    #[must_use]
    pub fn stage_labels(baseline_files: &[String]) -> Vec<String> {
        let named: Vec<Option<&'static str>> = baseline_files
            .iter()
            .map(|file| {
                let name = Path::new(file)
                    .file_name()
                    .map(|f| f.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if name.contains("before") {
                    Some("before")
                } else if name.contains("after") {
                    Some("after")
                } else {
                    None
                }
            })
            .collect();

        named
            .iter()
            .enumerate()
            .map(|(index, label)| match label {
                Some(label) if named.iter().filter(|l| *l == &Some(*label)).count() == 1 => {
                    (*label).to_string()
                }
                _ => format!("stage{index}"),
            })
            .collect()
    }
}

/// Storage port for artifacts, addressed by root-relative paths
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read a stored file
    async fn read(&self, path: &Path) -> CompararResult<Vec<u8>>;

    /// Write a file, creating parent directories as needed
    async fn write(&self, path: &Path, bytes: &[u8]) -> CompararResult<()>;
}

/// Artifact store backed by a directory tree
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a root-relative path
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if `path` could leave the root.
    pub fn resolve(&self, path: &Path) -> CompararResult<PathBuf> {
        ArtifactLayout::check_relative("artifact path", path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn read(&self, path: &Path) -> CompararResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)?).await?)
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> CompararResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, bytes).await?;
        Ok(())
    }
}

/// In-process artifact store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a file into the store
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), bytes);
    }

    /// Contents of a stored file
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// All stored paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn read(&self, path: &Path) -> CompararResult<Vec<u8>> {
        self.get(path).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
            .into()
        })
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> CompararResult<()> {
        self.insert(path, bytes.to_vec());
        Ok(())
    }
}
