//! Parse boundary for annotation files.
//!
//! Loosely-typed files on disk are mapped to a strictly typed
//! [`AnnotationDocument`], one variant per supported schema, and then
//! normalised into an [`AnnotationRecord`]. Anything that does not fit
//! becomes `EngineError::MalformedRecord`.

use serde::Deserialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::coco::CocoFile;
use crate::error::{EngineError, Result};
use crate::types::{
    stable_key, AnnotationFormat, AnnotationRecord, BoundingBox, ImageSize, ObjectAnnotation,
    PixelBox, YoloBox,
};

/// Name of the class manifest that maps YOLO class ids to labels.
pub const CLASS_MANIFEST_NAME: &str = "classes.txt";

/// Location of one annotation file, joined to its image by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSource {
    pub key: String,
    pub path: PathBuf,
}

impl AnnotationSource {
    /// Parse the file and normalise it. `class_names` resolves YOLO class ids.
    pub fn load(&self, class_names: Option<&[String]>) -> Result<AnnotationRecord> {
        AnnotationDocument::read(&self.path)
            .and_then(|document| document.into_record(&self.key, class_names))
            .map_err(|detail| EngineError::malformed(&self.key, &self.path, detail))
    }
}

/// Internal schema written by the capture and annotation tools.
#[derive(Debug, Clone, Deserialize)]
pub struct TempAnnotation {
    #[serde(default)]
    pub filename: Option<String>,
    /// `[height, width]`
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub bboxes: Vec<TempObject>,
    // Single-box form: `bbox` + `category` at top level, `[]` until annotated
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempObject {
    #[serde(alias = "category", alias = "label")]
    pub class_label: String,
    /// `[x1, y1, x2, y2]` in pixels
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloLine {
    pub class_id: usize,
    pub bbox: YoloBox,
}

/// One annotation file, typed by schema.
#[derive(Debug, Clone)]
pub enum AnnotationDocument {
    Temp(TempAnnotation),
    Yolo(Vec<YoloLine>),
    Coco(CocoFile),
}

impl AnnotationDocument {
    /// Read and parse a file; errors are returned as a human-readable detail.
    pub fn read(path: &Path) -> std::result::Result<Self, String> {
        match AnnotationFormat::from_path(path) {
            Some(AnnotationFormat::Yolo) => {
                let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
                parse_yolo_lines(&content).map(AnnotationDocument::Yolo)
            }
            Some(_) => {
                let file = File::open(path).map_err(|e| e.to_string())?;
                let value: Value =
                    serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;
                Self::from_json(value)
            }
            None => Err(format!("unsupported annotation file {}", path.display())),
        }
    }

    /// Classify a JSON value as COCO (has `images` and `annotations`) or the temp schema.
    pub fn from_json(value: Value) -> std::result::Result<Self, String> {
        let is_coco = value
            .as_object()
            .is_some_and(|map| map.contains_key("images") && map.contains_key("annotations"));
        if is_coco {
            serde_json::from_value(value)
                .map(AnnotationDocument::Coco)
                .map_err(|e| format!("invalid COCO record: {}", e))
        } else {
            serde_json::from_value(value)
                .map(AnnotationDocument::Temp)
                .map_err(|e| e.to_string())
        }
    }

    pub fn format(&self) -> AnnotationFormat {
        match self {
            AnnotationDocument::Temp(_) => AnnotationFormat::Temp,
            AnnotationDocument::Yolo(_) => AnnotationFormat::Yolo,
            AnnotationDocument::Coco(_) => AnnotationFormat::Coco,
        }
    }

    pub fn into_record(
        self,
        key: &str,
        class_names: Option<&[String]>,
    ) -> std::result::Result<AnnotationRecord, String> {
        let format = self.format();
        let (objects, declared_size) = match self {
            AnnotationDocument::Temp(temp) => temp_objects(temp)?,
            AnnotationDocument::Yolo(lines) => (yolo_objects(&lines, class_names)?, None),
            AnnotationDocument::Coco(coco) => coco_objects(key, coco)?,
        };
        Ok(AnnotationRecord {
            key: key.to_string(),
            format,
            objects,
            declared_size,
        })
    }
}

type Objects = (Vec<ObjectAnnotation>, Option<ImageSize>);

fn temp_objects(temp: TempAnnotation) -> std::result::Result<Objects, String> {
    let declared_size = temp
        .image_size
        .map(|[height, width]| ImageSize::new(width, height));

    let mut objects: Vec<ObjectAnnotation> = temp
        .bboxes
        .into_iter()
        .map(|object| ObjectAnnotation {
            class_label: object.class_label,
            bbox: pixel_box(object.bbox),
        })
        .collect();

    if objects.is_empty() {
        match temp.bbox.as_deref() {
            None | Some([]) => {}
            Some(&[x1, y1, x2, y2]) => {
                let class_label = temp
                    .category
                    .ok_or_else(|| "single-box record without 'category'".to_string())?;
                objects.push(ObjectAnnotation {
                    class_label,
                    bbox: pixel_box([x1, y1, x2, y2]),
                });
            }
            Some(other) => {
                return Err(format!(
                    "'bbox' must hold 4 numbers, found {}",
                    other.len()
                ))
            }
        }
    }

    Ok((objects, declared_size))
}

fn pixel_box([x1, y1, x2, y2]: [f64; 4]) -> BoundingBox {
    BoundingBox::Pixel(PixelBox { x1, y1, x2, y2 })
}

/// Parse `class_id cx cy w h` lines; blank lines are ignored.
pub fn parse_yolo_lines(content: &str) -> std::result::Result<Vec<YoloLine>, String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 5 {
                return Err(format!(
                    "line {}: expected 5 fields, found {}",
                    index + 1,
                    fields.len()
                ));
            }
            let class_id = fields[0]
                .parse::<usize>()
                .map_err(|e| format!("line {}: class id: {}", index + 1, e))?;
            let mut numbers = [0.0f64; 4];
            for (slot, field) in numbers.iter_mut().zip(&fields[1..]) {
                *slot = field
                    .parse::<f64>()
                    .map_err(|e| format!("line {}: '{}': {}", index + 1, field, e))?;
            }
            let [cx, cy, w, h] = numbers;
            Ok(YoloLine {
                class_id,
                bbox: YoloBox { cx, cy, w, h },
            })
        })
        .collect()
}

fn yolo_objects(
    lines: &[YoloLine],
    class_names: Option<&[String]>,
) -> std::result::Result<Vec<ObjectAnnotation>, String> {
    lines
        .iter()
        .map(|line| {
            let class_label = class_names
                .and_then(|names| names.get(line.class_id))
                .ok_or_else(|| {
                    format!("class id {} has no entry in {}", line.class_id, CLASS_MANIFEST_NAME)
                })?
                .clone();
            Ok(ObjectAnnotation {
                class_label,
                bbox: BoundingBox::Normalized(line.bbox),
            })
        })
        .collect()
}

fn coco_objects(key: &str, coco: CocoFile) -> std::result::Result<Objects, String> {
    let image = match coco.images.as_slice() {
        [only] => only,
        images => images
            .iter()
            .find(|image| stable_key(Path::new(&image.file_name)).as_deref() == Some(key))
            .ok_or_else(|| format!("no COCO image entry matches key '{}'", key))?,
    };

    let objects = coco
        .annotations
        .iter()
        .filter(|annotation| annotation.image_id == image.id)
        .map(|annotation| {
            let category = coco
                .categories
                .iter()
                .find(|category| category.id == annotation.category_id)
                .ok_or_else(|| format!("unknown COCO category id {}", annotation.category_id))?;
            let [x, y, w, h] = annotation.bbox;
            Ok(ObjectAnnotation {
                class_label: category.name.clone(),
                bbox: BoundingBox::Pixel(PixelBox {
                    x1: x,
                    y1: y,
                    x2: x + w,
                    y2: y + h,
                }),
            })
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    Ok((objects, Some(ImageSize::new(image.width, image.height))))
}

/// Read a `classes.txt` manifest: one label per line, line number is the class id.
pub fn read_class_manifest(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}
