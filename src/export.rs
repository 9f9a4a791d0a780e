//! Exporter: materializes a split as a self-contained training dataset.
//!
//! Everything is written into a staging directory next to the target. A
//! failure removes the staging tree and leaves any previous export in place;
//! success replaces the target in one rename. Output carries no timestamps, so
//! exporting an unchanged split twice gives identical files.

use dashmap::DashMap;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, ExportFormat};
use crate::error::{EngineError, Result};
use crate::index::CorpusIndex;
use crate::io::write_json_file;
use crate::layout::{Layout, COLLECTION_STATS_FILE_NAME, SPLIT_FILE_NAME};
use crate::split::SplitAssignment;
use crate::types::{AnnotationRecord, ImageRecord, ImageSize, Partition};
use crate::utils::{output_file_name, resolve_path};
use crate::validate::ValidationReport;
use crate::{coco_dataset, yolo_dataset};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Overrides `exports/<format>_dataset`
    pub output: Option<PathBuf>,
    /// Labels whose class ids are pinned to their position in this list
    pub labels: Vec<String>,
}

impl ExportConfig {
    /// Directory the export is committed to.
    ///
    /// The target is replaced wholesale, so it may not be the dataset root,
    /// one of its ancestors, or overlap the corpus, backups, reports or the
    /// `exports/` directory itself.
    pub fn target_dir(&self, layout: &Layout) -> Result<PathBuf> {
        let target = match &self.output {
            Some(output) => output.clone(),
            None => layout
                .exports_dir()
                .join(format!("{}_dataset", self.format)),
        };

        let resolved = resolve_path(&target)?;
        let root = resolve_path(layout.root())?;
        let reject = |reason: String| -> Result<PathBuf> {
            Err(EngineError::InvalidConfig(format!(
                "export target {} {}",
                target.display(),
                reason
            )))
        };

        if root.starts_with(&resolved) {
            return reject("would replace the dataset root".to_string());
        }
        if resolved == root.join("exports") {
            return reject("would replace every export".to_string());
        }
        let protected = Layout::corpus_subdirs()
            .iter()
            .map(|dir| root.join(dir))
            .chain([
                root.join("backups"),
                root.join("reports"),
                root.join(SPLIT_FILE_NAME),
                root.join(COLLECTION_STATS_FILE_NAME),
            ]);
        for path in protected {
            if path.starts_with(&resolved) || resolved.starts_with(&path) {
                return reject(format!("overlaps {}", path.display()));
            }
        }
        Ok(target)
    }
}

/// Integer class ids for every label of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMap {
    names: Vec<String>,
    ids: HashMap<String, usize>,
}

impl ClassMap {
    /// Pinned labels first, in the given order, then observed labels in first-seen order.
    pub fn build(pinned: &[String], observed: &[String]) -> Self {
        let mut map = ClassMap::default();
        for label in pinned.iter().chain(observed) {
            if !map.ids.contains_key(label) {
                map.ids.insert(label.clone(), map.names.len());
                map.names.push(label.clone());
            }
        }
        map
    }

    pub fn id_of(&self, label: &str) -> Option<usize> {
        self.ids.get(label).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionManifest {
    pub images: usize,
    pub objects: usize,
}

/// Description of a finished export, also written as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportManifest {
    pub format: ExportFormat,
    pub classes: Vec<String>,
    pub split_seed: u64,
    pub partitions: BTreeMap<Partition, PartitionManifest>,
    pub objects_per_class: BTreeMap<String, usize>,
    #[serde(skip)]
    pub target: PathBuf,
}

/// Everything needed to write one exported key.
pub struct ExportItem<'a> {
    pub key: &'a str,
    pub image: &'a ImageRecord,
    pub record: AnnotationRecord,
    pub size: ImageSize,
}

impl ExportItem<'_> {
    pub fn image_file_name(&self) -> String {
        output_file_name(self.key, &self.image.extension())
    }
}

/// Failure while writing one key; becomes `ExportIncomplete`.
#[derive(Debug)]
pub struct ItemError {
    pub key: String,
    pub detail: String,
}

impl ItemError {
    pub fn new(key: &str, detail: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Shared state of one export run.
pub struct ExportContext<'a> {
    pub class_map: &'a ClassMap,
    pub config: &'a Config,
    /// Objects written per class, tallied by the parallel writers
    pub class_counts: DashMap<String, usize>,
}

/// Export every key of `assignment` in the configured format.
pub fn export(
    index: &CorpusIndex,
    report: &ValidationReport,
    assignment: &SplitAssignment,
    config: &Config,
) -> Result<ExportManifest> {
    config.layout.create_missing_dirs()?;
    let export_config = &config.export;
    let target = export_config.target_dir(&config.layout)?;
    check_file_names(assignment)?;
    let staging = staging_dir(&target)?;

    let class_map = ClassMap::build(&export_config.labels, &report.class_labels);
    info!(
        "Exporting {} records as {} to {} ({} classes)",
        assignment.len(),
        export_config.format,
        target.display(),
        class_map.len()
    );

    let context = ExportContext {
        class_map: &class_map,
        config,
        class_counts: DashMap::new(),
    };

    let result = match export_config.format {
        ExportFormat::Yolo => yolo_dataset::export_yolo(index, assignment, &context, &staging, &target),
        ExportFormat::Coco => coco_dataset::export_coco(index, assignment, &context, &staging),
    };

    let partitions = match result {
        Ok(partitions) => partitions,
        Err(e) => {
            rollback(&staging);
            return Err(e);
        }
    };

    let manifest = ExportManifest {
        format: export_config.format,
        classes: class_map.names().to_vec(),
        split_seed: config.split.seed,
        partitions,
        objects_per_class: context.class_counts.into_iter().collect(),
        target: target.clone(),
    };

    if let Err(e) = write_json_file(&staging.join("manifest.json"), &manifest)
        .and_then(|_| commit(&staging, &target))
    {
        rollback(&staging);
        return Err(EngineError::ExportIncomplete {
            partition: "all".to_string(),
            key: "manifest".to_string(),
            detail: e.to_string(),
        });
    }

    info!("Dataset exported to: {}", target.display());
    Ok(manifest)
}

/// Resolve the image, annotation and size of each key of a partition.
pub fn collect_items<'a>(
    index: &'a CorpusIndex,
    keys: &[&'a str],
    context: &ExportContext,
) -> std::result::Result<Vec<ExportItem<'a>>, ItemError> {
    keys.iter()
        .map(|&key| {
            let entry = index
                .get(key)
                .ok_or_else(|| ItemError::new(key, "key no longer in the corpus"))?;
            let image = entry
                .image
                .as_ref()
                .ok_or_else(|| ItemError::new(key, "image missing"))?;
            let source = entry
                .annotation
                .as_ref()
                .ok_or_else(|| ItemError::new(key, "annotation missing"))?;
            let record = source
                .load(index.class_names())
                .map_err(|e| ItemError::new(key, e))?;
            let size = image
                .dimensions()
                .or(record.declared_size)
                .ok_or_else(|| ItemError::new(key, "image dimensions unavailable"))?;
            for object in &record.objects {
                if context.class_map.id_of(&object.class_label).is_none() {
                    return Err(ItemError::new(
                        key,
                        format!("label '{}' missing from class map", object.class_label),
                    ));
                }
            }
            Ok(ExportItem {
                key,
                image,
                record,
                size,
            })
        })
        .collect()
}

/// Copy the image of `item` into `images_dir`
pub fn copy_image(item: &ExportItem, images_dir: &Path) -> std::io::Result<()> {
    fs::copy(&item.image.path, images_dir.join(item.image_file_name()))?;
    Ok(())
}

pub fn incomplete(partition: Partition, error: ItemError) -> EngineError {
    error!(
        "Export failed in partition '{}' at key '{}': {}",
        partition, error.key, error.detail
    );
    EngineError::ExportIncomplete {
        partition: partition.to_string(),
        key: error.key,
        detail: error.detail,
    }
}

/// `ExportIncomplete` for a file that belongs to no single key, such as
/// `classes.txt` or the staging directory itself.
pub fn write_failed(partition: &str, file: &Path, detail: impl ToString) -> EngineError {
    let file = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let detail = detail.to_string();
    error!(
        "Export failed in partition '{}' writing '{}': {}",
        partition, file, detail
    );
    EngineError::ExportIncomplete {
        partition: partition.to_string(),
        key: file,
        detail,
    }
}

/// Exported files are named after sanitized keys; two keys may not share a name.
fn check_file_names(assignment: &SplitAssignment) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (key, partition) in assignment.iter() {
        let name = output_file_name(key, "");
        if let Some(first) = seen.insert(name.clone(), key) {
            return Err(incomplete(
                partition,
                ItemError::new(
                    key,
                    format!("exported file name '{}' is also used by key '{}'", name, first),
                ),
            ));
        }
    }
    Ok(())
}

fn staging_dir(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            EngineError::InvalidConfig(format!("invalid export target {}", target.display()))
        })?;
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| write_failed("all", parent, e))?;
    Ok(parent.join(format!(".{}.partial", name)))
}

fn commit(staging: &Path, target: &Path) -> std::io::Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    fs::rename(staging, target)
}

fn rollback(staging: &Path) {
    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!(
                "Failed to remove partial export {}: {}",
                staging.display(),
                e
            );
        } else {
            info!("Removed partial export {}", staging.display());
        }
    }
}
