//! Dataset integrity and export engine
//!
//! Keeps raw images and their annotation records consistent, reconciles
//! orphans under an explicit policy, splits the corpus reproducibly and
//! exports YOLO or COCO training datasets.

pub mod annotation;
pub mod backup;
pub mod checksum;
pub mod clean;
pub mod coco;
pub mod coco_dataset;
pub mod config;
pub mod conversion;
pub mod error;
pub mod export;
pub mod index;
pub mod io;
pub mod layout;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod types;
pub mod utils;
pub mod validate;
pub mod yolo_dataset;

// Re-export commonly used types and functions
pub use config::{Action, Args, Config, ExportFormat};
pub use error::{EngineError, Result};
pub use index::CorpusIndex;
pub use layout::Layout;
pub use pipeline::{run, ActionOutcome};
pub use split::{split, SplitAssignment, SplitConfig, SplitRatios};
pub use types::{AnnotationRecord, BoundingBox, ImageRecord, Partition, ViolationKind};
pub use validate::{validate, ValidationReport};
