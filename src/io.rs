use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::export::ClassMap;
use crate::types::Partition;
use crate::utils::{create_output_directory, resolve_path};

/// Output directories of one partition
#[derive(Debug, Clone)]
pub struct PartitionDirs {
    pub images_dir: PathBuf,
    /// YOLO label files; COCO writes one JSON per partition instead
    pub labels_dir: Option<PathBuf>,
}

/// Struct to hold the paths to the output directories of every exported partition
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub base_dir: PathBuf,
    pub partitions: BTreeMap<Partition, PartitionDirs>,
    /// COCO `annotations/` directory
    pub annotations_dir: Option<PathBuf>,
}

impl OutputDirs {
    pub fn partition(&self, partition: Partition) -> Option<&PartitionDirs> {
        self.partitions.get(&partition)
    }
}

/// Set up the directory structure for a YOLO dataset under `base_dir`
pub fn setup_yolo_output_directories(
    base_dir: &Path,
    partitions: &[Partition],
) -> std::io::Result<OutputDirs> {
    let base_dir = create_output_directory(base_dir)?;
    let labels_dir = base_dir.join("labels");
    let images_dir = base_dir.join("images");

    let mut dirs = BTreeMap::new();
    for partition in partitions {
        let images_dir = images_dir.join(partition.as_str());
        let labels_dir = labels_dir.join(partition.as_str());
        fs::create_dir_all(&images_dir)?;
        fs::create_dir_all(&labels_dir)?;
        dirs.insert(
            *partition,
            PartitionDirs {
                images_dir,
                labels_dir: Some(labels_dir),
            },
        );
    }

    Ok(OutputDirs {
        base_dir,
        partitions: dirs,
        annotations_dir: None,
    })
}

/// Set up the directory structure for a COCO dataset under `base_dir`
pub fn setup_coco_output_directories(
    base_dir: &Path,
    partitions: &[Partition],
) -> std::io::Result<OutputDirs> {
    let base_dir = create_output_directory(base_dir)?;
    let annotations_dir = base_dir.join("annotations");
    fs::create_dir_all(&annotations_dir)?;

    let mut dirs = BTreeMap::new();
    for partition in partitions {
        let images_dir = base_dir.join("images").join(partition.as_str());
        fs::create_dir_all(&images_dir)?;
        dirs.insert(
            *partition,
            PartitionDirs {
                images_dir,
                labels_dir: None,
            },
        );
    }

    Ok(OutputDirs {
        base_dir,
        partitions: dirs,
        annotations_dir: Some(annotations_dir),
    })
}

/// Create the dataset.yaml file for YOLO training
///
/// `final_dir` is where the dataset lives once the export is committed; the
/// file itself is written into `output_dirs.base_dir`.
pub fn create_dataset_yaml(
    output_dirs: &OutputDirs,
    final_dir: &Path,
    class_map: &ClassMap,
) -> std::io::Result<()> {
    let dataset_yaml_path = output_dirs.base_dir.join("dataset.yaml");
    let mut dataset_yaml = BufWriter::new(File::create(&dataset_yaml_path)?);
    let mut yaml_content = format!(
        "path: {}\ntrain: images/train\nval: images/val\n",
        resolve_path(final_dir)?.to_string_lossy()
    );
    if output_dirs.partitions.contains_key(&Partition::Test) {
        yaml_content.push_str("test: images/test\n");
    } else {
        yaml_content.push_str("test:\n");
    }
    yaml_content.push_str(&format!("\nnc: {}\nnames:\n", class_map.len()));

    for (id, label) in class_map.names().iter().enumerate() {
        yaml_content.push_str(&format!("    {}: {}\n", id, label));
    }
    dataset_yaml.write_all(yaml_content.as_bytes())?;
    dataset_yaml.flush()
}

/// Write `classes.txt`: one label per line, line index is the class id
pub fn write_class_manifest(path: &Path, class_map: &ClassMap) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for name in class_map.names() {
        writeln!(writer, "{}", name)?;
    }
    writer.flush()
}

/// Write any serializable value as pretty JSON with a trailing newline
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
