//! Record index: joins raw images and annotation files by stable key.
//!
//! The index is a cache of disk state. It is rebuilt by every scan and never
//! patched after a mutation; actions that change the corpus consume it.

use chrono::{DateTime, Utc};
use glob::{glob, Pattern};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::{read_class_manifest, AnnotationSource, CLASS_MANIFEST_NAME};
use crate::error::Result;
use crate::layout::Layout;
use crate::types::{is_image_file, stable_key, AnnotationFormat, ImageRecord, ScanSummary};

/// Both sides of one stable key. At least one side is present.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub image: Option<ImageRecord>,
    pub annotation: Option<AnnotationSource>,
}

/// A second file that maps to an already taken key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCollision {
    pub key: String,
    pub kept: PathBuf,
    pub ignored: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    entries: BTreeMap<String, CorpusEntry>,
    class_names: Option<Vec<String>>,
    collisions: Vec<KeyCollision>,
    skipped: Vec<PathBuf>,
}

impl CorpusIndex {
    /// Enumerate raw images and annotation files under `layout` and join them by key.
    ///
    /// Only a missing or unreadable root fails; per-file problems are logged
    /// and left for the validator.
    pub fn scan(layout: &Layout) -> Result<Self> {
        layout.check_available()?;
        info!("Scanning dataset at {}", layout.root().display());

        let mut index = CorpusIndex::default();

        let raw_dir = layout.raw_images_dir();
        let mut image_paths = Vec::new();
        for path in list_files(&raw_dir) {
            if is_image_file(&path) {
                image_paths.push(path);
            } else {
                warn!("Skipping non-image file {}", path.display());
                index.skipped.push(path);
            }
        }

        let images: Vec<ImageRecord> = image_paths
            .into_par_iter()
            .filter_map(|path| {
                let key = stable_key(&path)?;
                let (file_size, modified) = file_stats(&path);
                Some(ImageRecord::new(key, path, file_size, modified))
            })
            .collect();

        for image in images {
            let taken_by = index
                .entries
                .get(&image.key)
                .and_then(|entry| entry.image.as_ref())
                .map(|kept| kept.path.clone());
            match taken_by {
                Some(kept) => index.record_collision(image.key, kept, image.path),
                None => {
                    index.entries.insert(
                        image.key.clone(),
                        CorpusEntry {
                            image: Some(image),
                            annotation: None,
                        },
                    );
                }
            }
        }

        let temp_dir = layout.temp_annotations_dir();
        let manifest_path = temp_dir.join(CLASS_MANIFEST_NAME);
        if manifest_path.is_file() {
            match read_class_manifest(&manifest_path) {
                Ok(names) => index.class_names = Some(names),
                Err(e) => warn!("Cannot read {}: {}", manifest_path.display(), e),
            }
        }

        for path in list_files(&temp_dir) {
            if path == manifest_path {
                continue;
            }
            let key = match (AnnotationFormat::from_path(&path), stable_key(&path)) {
                (Some(_), Some(key)) => key,
                _ => {
                    warn!("Skipping unrecognized annotation file {}", path.display());
                    index.skipped.push(path);
                    continue;
                }
            };

            let taken_by = index
                .entries
                .get(&key)
                .and_then(|entry| entry.annotation.as_ref())
                .map(|kept| kept.path.clone());
            match taken_by {
                Some(kept) => index.record_collision(key, kept, path),
                None => {
                    let entry = index.entries.entry(key.clone()).or_insert(CorpusEntry {
                        image: None,
                        annotation: None,
                    });
                    entry.annotation = Some(AnnotationSource { key, path });
                }
            }
        }

        let summary = index.summary();
        summary.print_summary();
        Ok(index)
    }

    fn record_collision(&mut self, key: String, kept: PathBuf, ignored: PathBuf) {
        warn!(
            "Key '{}' already taken by {}; ignoring {}",
            key,
            kept.display(),
            ignored.display()
        );
        self.collisions.push(KeyCollision { key, kept, ignored });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in lexical key order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &CorpusEntry)> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&CorpusEntry> {
        self.entries.get(key)
    }

    /// Class names from `annotations/temp/classes.txt`, used to resolve YOLO-format records.
    pub fn class_names(&self) -> Option<&[String]> {
        self.class_names.as_deref()
    }

    pub fn collisions(&self) -> &[KeyCollision] {
        &self.collisions
    }

    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            skipped_files: self.skipped.len(),
            key_collisions: self.collisions.len(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            match (&entry.image, &entry.annotation) {
                (Some(_), Some(_)) => {
                    summary.total_images += 1;
                    summary.annotated_images += 1;
                }
                (Some(_), None) => {
                    summary.total_images += 1;
                    summary.unannotated_images += 1;
                }
                (None, Some(_)) => summary.orphan_annotations += 1,
                (None, None) => {}
            }
        }
        summary
    }
}

/// Regular files directly inside `dir`, sorted by path. A missing directory yields nothing.
fn list_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!("Directory {} does not exist", dir.display());
        return Vec::new();
    }
    let pattern = format!("{}/*", Pattern::escape(&dir.to_string_lossy()));
    let mut paths: Vec<PathBuf> = match glob(&pattern) {
        Ok(entries) => entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Cannot read directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            warn!("Invalid glob pattern for {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    paths.sort();
    paths
}

fn file_stats(path: &Path) -> (u64, Option<DateTime<Utc>>) {
    match fs::metadata(path) {
        Ok(metadata) => (
            metadata.len(),
            metadata.modified().ok().map(DateTime::<Utc>::from),
        ),
        Err(e) => {
            warn!("Cannot read metadata of {}: {}", path.display(), e);
            (0, None)
        }
    }
}
