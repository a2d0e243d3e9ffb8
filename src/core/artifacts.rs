//! Output file layout for a run.
//!
//! Every generated file gets a fresh random name under its category
//! directory, so re-running a stage never overwrites earlier output.

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::PipelineError;

/// Artifact category, one directory each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    Audio,
    Images,
    Clips,
    /// Per-section videos of a long-form run
    Sections,
    Final,
    Debug,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 6] = [
        ArtifactCategory::Audio,
        ArtifactCategory::Images,
        ArtifactCategory::Clips,
        ArtifactCategory::Sections,
        ArtifactCategory::Final,
        ArtifactCategory::Debug,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactCategory::Audio => "audio",
            ArtifactCategory::Images => "images",
            ArtifactCategory::Clips => "clips",
            ArtifactCategory::Sections => "sections",
            ArtifactCategory::Final => "final",
            ArtifactCategory::Debug => "debug",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: ArtifactCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Create every category directory
    pub async fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for category in ArtifactCategory::ALL {
            tokio::fs::create_dir_all(self.category_dir(category)).await?;
        }
        Ok(())
    }

    /// A path that no earlier artifact uses: `<root>/<category>/<uuid>.<ext>`
    pub fn fresh_path(&self, category: ArtifactCategory, extension: &str) -> PathBuf {
        let name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        self.category_dir(category).join(name)
    }

    /// Write bytes to a fresh path and return it
    pub async fn write(
        &self,
        category: ArtifactCategory,
        extension: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, PipelineError> {
        let path = self.fresh_path(category, extension);
        write_to(&path, bytes).await?;
        Ok(path)
    }
}

/// A provider-reported file extension if it is a plain alphanumeric token,
/// otherwise `fallback`
pub fn clean_extension<'a>(extension: &'a str, fallback: &'a str) -> &'a str {
    if !extension.is_empty() && extension.len() <= 8 && extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        extension
    } else {
        fallback
    }
}

/// Write bytes to an already-chosen artifact path, creating its directory
pub async fn write_to(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_paths_are_unique() {
        let store = ArtifactStore::new("/out");
        let a = store.fresh_path(ArtifactCategory::Images, "png");
        let b = store.fresh_path(ArtifactCategory::Images, "png");

        assert_ne!(a, b);
        assert!(a.starts_with("/out/images"));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[tokio::test]
    async fn test_write_creates_category_dir() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let path = store
            .write(ArtifactCategory::Audio, "mp3", b"ID3")
            .await
            .unwrap();

        assert!(path.starts_with(temp.path().join("audio")));
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3");
    }

    #[test]
    fn test_clean_extension() {
        assert_eq!(clean_extension("mp3", "mp3"), "mp3");
        assert_eq!(clean_extension("wav", "mp3"), "wav");
        assert_eq!(clean_extension("mp3/../../x", "mp3"), "mp3");
        assert_eq!(clean_extension("", "mp3"), "mp3");
        assert_eq!(clean_extension(".ogg", "mp3"), "mp3");
    }

    #[tokio::test]
    async fn test_ensure_dirs() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        store.ensure_dirs().await.unwrap();

        for category in ArtifactCategory::ALL {
            assert!(store.category_dir(category).is_dir());
        }
    }
}
