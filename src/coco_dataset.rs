//! COCO export: one `instances_<partition>.json` per partition plus image copies.

use log::info;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::coco::CocoWriter;
use crate::error::Result;
use crate::export::{
    collect_items, copy_image, incomplete, write_failed, ExportContext, ItemError,
    PartitionManifest,
};
use crate::index::CorpusIndex;
use crate::io::{setup_coco_output_directories, write_json_file};
use crate::split::SplitAssignment;
use crate::types::Partition;
use crate::utils::{create_io_thread_pool, create_progress_bar};

pub fn export_coco(
    index: &CorpusIndex,
    assignment: &SplitAssignment,
    context: &ExportContext,
    staging: &Path,
) -> Result<BTreeMap<Partition, PartitionManifest>> {
    let partitions = assignment.partitions();
    let output_dirs = setup_coco_output_directories(staging, &partitions)
        .map_err(|e| write_failed("all", staging, e))?;
    let annotations_dir = output_dirs
        .annotations_dir
        .clone()
        .unwrap_or_else(|| output_dirs.base_dir.join("annotations"));
    let pool = create_io_thread_pool(context.config.workers)
        .map_err(|e| write_failed("all", staging, e))?;

    let mut manifest = BTreeMap::new();
    for partition in partitions {
        let Some(dirs) = output_dirs.partition(partition) else {
            continue;
        };
        let keys = assignment.keys_in(partition);
        let items =
            collect_items(index, &keys, context).map_err(|e| incomplete(partition, e))?;

        // Copies run in parallel; ids are assigned afterwards in key order
        let pb = create_progress_bar(
            items.len() as u64,
            partition.as_str(),
            context.config.show_progress,
        );
        let copied: Vec<std::result::Result<(), ItemError>> = pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let result =
                        copy_image(item, &dirs.images_dir).map_err(|e| ItemError::new(item.key, e));
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();
        for result in copied {
            result.map_err(|e| incomplete(partition, e))?;
        }

        let mut writer = CocoWriter::new(context.class_map.names());
        let mut objects = 0;
        for item in &items {
            let image_id = writer.add_image(item.image_file_name(), item.size);
            for object in &item.record.objects {
                let class_id = context.class_map.id_of(&object.class_label).ok_or_else(|| {
                    incomplete(
                        partition,
                        ItemError::new(
                            item.key,
                            format!("label '{}' missing from class map", object.class_label),
                        ),
                    )
                })?;
                writer.add_annotation(image_id, class_id, object.bbox.to_pixel(item.size));
                *context
                    .class_counts
                    .entry(object.class_label.clone())
                    .or_insert(0) += 1;
                objects += 1;
            }
        }

        let path = annotations_dir.join(format!("instances_{}.json", partition));
        write_json_file(&path, &writer.build())
            .map_err(|e| write_failed(partition.as_str(), &path, e))?;
        info!("Wrote {} ({} images, {} objects)", path.display(), items.len(), objects);
        manifest.insert(
            partition,
            PartitionManifest {
                images: items.len(),
                objects,
            },
        );
    }

    Ok(manifest)
}
