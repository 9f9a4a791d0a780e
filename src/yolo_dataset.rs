use log::info;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::conversion::convert_to_yolo_format;
use crate::error::Result;
use crate::export::{
    collect_items, copy_image, incomplete, write_failed, ExportContext, ExportItem, ItemError,
    PartitionManifest,
};
use crate::index::CorpusIndex;
use crate::io::{create_dataset_yaml, setup_yolo_output_directories, write_class_manifest};
use crate::split::SplitAssignment;
use crate::types::Partition;
use crate::utils::{create_io_thread_pool, create_progress_bar, output_file_name};

/// Write a YOLO dataset into `staging`:
/// `images/<p>/`, `labels/<p>/`, `classes.txt` and `dataset.yaml`.
///
/// `final_dir` is only used for the `path:` entry of `dataset.yaml`.
pub fn export_yolo(
    index: &CorpusIndex,
    assignment: &SplitAssignment,
    context: &ExportContext,
    staging: &Path,
    final_dir: &Path,
) -> Result<BTreeMap<Partition, PartitionManifest>> {
    let partitions = assignment.partitions();
    let output_dirs = setup_yolo_output_directories(staging, &partitions)
        .map_err(|e| write_failed("all", staging, e))?;
    let pool = create_io_thread_pool(context.config.workers)
        .map_err(|e| write_failed("all", staging, e))?;

    let mut manifest = BTreeMap::new();
    for partition in partitions {
        let Some(dirs) = output_dirs.partition(partition) else {
            continue;
        };
        let Some(labels_dir) = dirs.labels_dir.as_deref() else {
            continue;
        };
        let keys = assignment.keys_in(partition);
        let items =
            collect_items(index, &keys, context).map_err(|e| incomplete(partition, e))?;

        let pb = create_progress_bar(
            items.len() as u64,
            partition.as_str(),
            context.config.show_progress,
        );
        let results: Vec<std::result::Result<usize, ItemError>> = pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let written = write_yolo_item(item, &dirs.images_dir, labels_dir, context);
                    pb.inc(1);
                    written
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut objects = 0;
        for result in results {
            objects += result.map_err(|e| incomplete(partition, e))?;
        }
        info!(
            "Exported {} images ({} objects) to {}",
            items.len(),
            objects,
            partition
        );
        manifest.insert(
            partition,
            PartitionManifest {
                images: items.len(),
                objects,
            },
        );
    }

    let classes_path = output_dirs.base_dir.join("classes.txt");
    write_class_manifest(&classes_path, context.class_map)
        .map_err(|e| write_failed("all", &classes_path, e))?;
    create_dataset_yaml(&output_dirs, final_dir, context.class_map)
        .map_err(|e| write_failed("all", Path::new("dataset.yaml"), e))?;
    Ok(manifest)
}

/// Copy one image and write its label file; returns the number of objects written.
fn write_yolo_item(
    item: &ExportItem,
    images_dir: &Path,
    labels_dir: &Path,
    context: &ExportContext,
) -> std::result::Result<usize, ItemError> {
    let yolo_data = convert_to_yolo_format(&item.record, item.size, context.class_map)
        .map_err(|e| ItemError::new(item.key, e))?;
    copy_image(item, images_dir).map_err(|e| ItemError::new(item.key, e))?;
    fs::write(labels_dir.join(output_file_name(item.key, "txt")), yolo_data)
        .map_err(|e| ItemError::new(item.key, e))?;

    for object in &item.record.objects {
        *context
            .class_counts
            .entry(object.class_label.clone())
            .or_insert(0) += 1;
    }
    Ok(item.record.objects.len())
}
