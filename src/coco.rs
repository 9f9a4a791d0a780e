//! COCO format data structures
//!
//! Used both to read single-image COCO annotation records from the corpus and
//! to write the per-partition `instances_<partition>.json` files of a COCO export.

use serde::{Deserialize, Serialize};

use crate::types::{ImageSize, PixelBox};

/// COCO dataset information
///
/// Carries no creation date so that re-exporting an unchanged corpus yields
/// identical files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contributor: String,
    #[serde(default)]
    pub url: String,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Exported by dataset-manager".to_string(),
            contributor: "dataset-manager".to_string(),
            url: String::new(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Unknown".to_string(),
            url: String::new(),
        }
    }
}

/// COCO category information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub license: u32,
}

impl Image {
    pub fn new(id: u32, file_name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            file_name,
            width,
            height,
            license: 1,
        }
    }
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [f64; 4], // [x, y, width, height]
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub iscrowd: u32,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub licenses: Vec<License>,
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
}

/// Writer for one partition of a COCO export.
///
/// Image and annotation ids are handed out in call order, so callers feed
/// images in stable key order to get reproducible ids.
pub struct CocoWriter {
    categories: Vec<Category>,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    next_image_id: u32,
    next_annotation_id: u32,
}

impl CocoWriter {
    /// Create a writer whose categories follow `class_names` (COCO ids are 1-based).
    pub fn new(class_names: &[String]) -> Self {
        let categories = class_names
            .iter()
            .enumerate()
            .map(|(index, name)| Category {
                id: index as u32 + 1,
                name: name.clone(),
                supercategory: "none".to_string(),
            })
            .collect();
        Self {
            categories,
            images: Vec::new(),
            annotations: Vec::new(),
            next_image_id: 1,
            next_annotation_id: 1,
        }
    }

    /// Add an image to the COCO dataset
    pub fn add_image(&mut self, file_name: String, size: ImageSize) -> u32 {
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.images
            .push(Image::new(image_id, file_name, size.width, size.height));
        image_id
    }

    /// Add an annotation to the COCO dataset
    pub fn add_annotation(&mut self, image_id: u32, class_id: usize, bbox: PixelBox) -> u32 {
        let annotation_id = self.next_annotation_id;
        self.next_annotation_id += 1;
        self.annotations.push(Annotation {
            id: annotation_id,
            image_id,
            category_id: class_id as u32 + 1,
            bbox: bbox.to_xywh(),
            area: bbox.width() * bbox.height(),
            iscrowd: 0,
        });
        annotation_id
    }

    /// Build the complete COCO dataset structure
    pub fn build(self) -> CocoFile {
        CocoFile {
            info: Info::default(),
            licenses: vec![License::default()],
            categories: self.categories,
            images: self.images,
            annotations: self.annotations,
        }
    }
}
