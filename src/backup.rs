use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::io::write_json_file;
use crate::layout::Layout;
use crate::types::ScanSummary;
use crate::utils::{create_progress_bar, timestamp_slug, unique_child};

pub const BACKUP_MANIFEST_NAME: &str = "backup_manifest.json";

/// Contents of `backup_manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupManifest {
    pub created_at: DateTime<Utc>,
    pub source: PathBuf,
    pub files: usize,
    pub bytes: u64,
    /// Top-level entries copied, relative to the dataset root
    pub contents: Vec<String>,
    pub scan: ScanSummary,
    #[serde(skip)]
    pub destination: PathBuf,
}

/// Copy the corpus, the split file and the collection stats to
/// `backups/dataset_backup_<timestamp>/`. The corpus itself is only read.
pub fn backup(layout: &Layout, scan: &ScanSummary, show_progress: bool) -> Result<BackupManifest> {
    layout.check_available()?;
    let backups_dir = layout.backups_dir();
    let destination = unique_child(&backups_dir, &format!("dataset_backup_{}", timestamp_slug()));
    info!("Creating dataset backup at {}", destination.display());

    match write_backup(layout, scan, &destination, show_progress) {
        Ok(manifest) => {
            info!(
                "Backup created: {} ({} files, {} bytes)",
                destination.display(),
                manifest.files,
                manifest.bytes
            );
            Ok(manifest)
        }
        Err(e) => {
            if destination.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&destination) {
                    warn!(
                        "Failed to remove partial backup {}: {}",
                        destination.display(),
                        cleanup
                    );
                }
            }
            Err(EngineError::BackupFailed {
                destination,
                detail: e.to_string(),
            })
        }
    }
}

fn write_backup(
    layout: &Layout,
    scan: &ScanSummary,
    destination: &Path,
    show_progress: bool,
) -> std::io::Result<BackupManifest> {
    let root = layout.root();
    let mut contents = Vec::new();
    let mut sources = Vec::new();

    for dir in Layout::corpus_subdirs() {
        let source_dir = root.join(dir);
        if !source_dir.is_dir() {
            continue;
        }
        contents.push(dir.to_string());
        sources.extend(
            WalkDir::new(&source_dir)
                .skip_hidden(false)
                .sort(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.path()),
        );
    }
    for file in [layout.split_file(), layout.collection_stats_file()] {
        if file.is_file() {
            if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                contents.push(name.to_string());
            }
            sources.push(file);
        }
    }

    fs::create_dir_all(destination)?;
    let pb = create_progress_bar(sources.len() as u64, "Backup", show_progress);
    let mut bytes = 0;
    for source in &sources {
        let relative = source
            .strip_prefix(root)
            .map_err(|e| std::io::Error::other(format!("{}: {}", source.display(), e)))?;
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        bytes += fs::copy(source, &target)?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let manifest = BackupManifest {
        created_at: Utc::now(),
        source: fs::canonicalize(root)?,
        files: sources.len(),
        bytes,
        contents,
        scan: scan.clone(),
        destination: destination.to_path_buf(),
    };
    write_json_file(&destination.join(BACKUP_MANIFEST_NAME), &manifest)?;
    Ok(manifest)
}
