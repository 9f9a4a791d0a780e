use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// Supported raw image formats
pub const IMG_FORMATS: &[&str] = &["jpg", "jpeg", "png"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Returns true when the path carries one of the recognized image extensions.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

/// Stable key of a file: its stem.
pub fn stable_key(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Box corners in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PixelBox {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn to_yolo(&self, size: ImageSize) -> YoloBox {
        let w = size.width as f64;
        let h = size.height as f64;
        YoloBox {
            cx: (self.x1 + self.x2) / 2.0 / w,
            cy: (self.y1 + self.y2) / 2.0 / h,
            w: self.width() / w,
            h: self.height() / h,
        }
    }

    /// `[x, y, width, height]` as used by COCO.
    pub fn to_xywh(&self) -> [f64; 4] {
        [self.x1, self.y1, self.width(), self.height()]
    }
}

/// YOLO convention: centre and size relative to the image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YoloBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

impl YoloBox {
    pub fn to_pixel(&self, size: ImageSize) -> PixelBox {
        let w = size.width as f64;
        let h = size.height as f64;
        let half_w = self.w * w / 2.0;
        let half_h = self.h * h / 2.0;
        PixelBox {
            x1: self.cx * w - half_w,
            y1: self.cy * h - half_h,
            x2: self.cx * w + half_w,
            y2: self.cy * h + half_h,
        }
    }
}

/// A bounding box in the native convention of the record it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundingBox {
    Pixel(PixelBox),
    Normalized(YoloBox),
}

impl BoundingBox {
    pub fn to_pixel(&self, size: ImageSize) -> PixelBox {
        match self {
            BoundingBox::Pixel(b) => *b,
            BoundingBox::Normalized(b) => b.to_pixel(size),
        }
    }

    pub fn to_yolo(&self, size: ImageSize) -> YoloBox {
        match self {
            BoundingBox::Pixel(b) => b.to_yolo(size),
            BoundingBox::Normalized(b) => *b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAnnotation {
    pub class_label: String,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationFormat {
    Temp,
    Yolo,
    Coco,
}

impl AnnotationFormat {
    /// Guess the format of an annotation file from its extension alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(AnnotationFormat::Temp),
            Some("txt") => Some(AnnotationFormat::Yolo),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationFormat::Temp => "temp",
            AnnotationFormat::Yolo => "yolo",
            AnnotationFormat::Coco => "coco",
        };
        f.write_str(name)
    }
}

/// Annotation of one image, normalised from whichever schema it was stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub key: String,
    pub format: AnnotationFormat,
    pub objects: Vec<ObjectAnnotation>,
    /// Size recorded by the annotation tool, if any.
    pub declared_size: Option<ImageSize>,
}

impl AnnotationRecord {
    /// Most frequent class label, ties broken by lexical order.
    pub fn dominant_label(&self) -> Option<String> {
        let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
        for object in &self.objects {
            *counts.entry(object.class_label.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .fold(None::<(&str, usize)>, |best, (label, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((label, count)),
            })
            .map(|(label, _)| label.to_string())
    }
}

/// A raw image discovered during a scan.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub key: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub modified: Option<DateTime<Utc>>,
    dimensions: OnceLock<Option<ImageSize>>,
}

impl ImageRecord {
    pub fn new(key: String, path: PathBuf, file_size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            key,
            path,
            file_size,
            modified,
            dimensions: OnceLock::new(),
        }
    }

    /// Image dimensions read from the file header on first use.
    pub fn dimensions(&self) -> Option<ImageSize> {
        *self.dimensions.get_or_init(|| {
            match image::image_dimensions(&self.path) {
                Ok((width, height)) => Some(ImageSize::new(width, height)),
                Err(e) => {
                    log::debug!("Cannot read dimensions of {}: {}", self.path.display(), e);
                    None
                }
            }
        })
    }

    /// Capture time encoded in collector file names (`<label>_<nnnn>_<YYYYmmdd_HHMMSS>`),
    /// falling back to the file modification time.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        parse_capture_timestamp(&self.key).or(self.modified)
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default()
    }
}

fn parse_capture_timestamp(key: &str) -> Option<DateTime<Utc>> {
    const STAMP_LEN: usize = "YYYYmmdd_HHMMSS".len();
    let start = key.len().checked_sub(STAMP_LEN)?;
    let stamp = key.get(start..)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Image with no annotation
    #[value(name = "orphan_image")]
    OrphanImage,
    /// Annotation with no image
    #[value(name = "orphan_annotation")]
    OrphanAnnotation,
    /// Annotation that fails to parse or violates the schema
    #[value(name = "malformed_annotation")]
    MalformedAnnotation,
    /// Well-formed annotation with zero objects
    #[value(name = "empty_annotation")]
    EmptyAnnotation,
    /// Image whose bytes match an earlier image
    #[value(name = "duplicate_image")]
    DuplicateImage,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 5] = [
        ViolationKind::OrphanImage,
        ViolationKind::OrphanAnnotation,
        ViolationKind::MalformedAnnotation,
        ViolationKind::EmptyAnnotation,
        ViolationKind::DuplicateImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::OrphanImage => "orphan_image",
            ViolationKind::OrphanAnnotation => "orphan_annotation",
            ViolationKind::MalformedAnnotation => "malformed_annotation",
            ViolationKind::EmptyAnnotation => "empty_annotation",
            ViolationKind::DuplicateImage => "duplicate_image",
        }
    }

    /// Warning-level findings do not keep a record out of a split.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ViolationKind::EmptyAnnotation | ViolationKind::DuplicateImage
        )
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub key: String,
    pub kind: ViolationKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// Counts produced by a scan
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_images: usize,
    pub annotated_images: usize,
    pub unannotated_images: usize,
    pub orphan_annotations: usize,
    pub skipped_files: usize,
    pub key_collisions: usize,
}

impl ScanSummary {
    pub fn print_summary(&self) {
        log::info!("=== Scan Summary ===");
        log::info!("Total images: {}", self.total_images);
        log::info!("Annotated images: {}", self.annotated_images);
        log::info!("Unannotated images: {}", self.unannotated_images);
        log::info!("Annotations without image: {}", self.orphan_annotations);

        if self.skipped_files > 0 || self.key_collisions > 0 {
            log::warn!(
                "Ignored files: {} (unrecognized extension: {}, key collisions: {})",
                self.skipped_files + self.key_collisions,
                self.skipped_files,
                self.key_collisions
            );
        }
    }
}
