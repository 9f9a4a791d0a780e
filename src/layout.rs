//! On-disk directory contract of a dataset root.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

pub const SPLIT_FILE_NAME: &str = "train_val_split.json";
pub const COLLECTION_STATS_FILE_NAME: &str = "collection_stats.json";

/// Path resolution for one dataset root. Holds no state beyond the root itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_images_dir(&self) -> PathBuf {
        self.root.join("images/raw")
    }

    pub fn temp_annotations_dir(&self) -> PathBuf {
        self.root.join("annotations/temp")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.backups_dir().join("quarantine")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn split_file(&self) -> PathBuf {
        self.root.join(SPLIT_FILE_NAME)
    }

    pub fn collection_stats_file(&self) -> PathBuf {
        self.root.join(COLLECTION_STATS_FILE_NAME)
    }

    /// Directories that make up the corpus proper, relative to the root.
    pub fn corpus_subdirs() -> &'static [&'static str] {
        &[
            "images/raw",
            "images/processed",
            "annotations/temp",
            "annotations/yolo",
            "annotations/coco",
        ]
    }

    /// Fail with `StorageUnavailable` unless the root is a readable directory.
    pub fn check_available(&self) -> Result<()> {
        let unavailable = |reason: String| EngineError::StorageUnavailable {
            path: self.root.clone(),
            reason,
        };

        let metadata = fs::metadata(&self.root).map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        fs::read_dir(&self.root).map_err(|e| unavailable(e.to_string()))?;
        Ok(())
    }

    /// Create any missing directory of the fixed subtree.
    pub fn create_missing_dirs(&self) -> Result<()> {
        self.check_available()?;
        for dir in Self::corpus_subdirs() {
            fs::create_dir_all(self.root.join(dir))?;
        }
        fs::create_dir_all(self.exports_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}
