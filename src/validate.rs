//! Integrity checks over a scanned corpus.
//!
//! Each key receives exactly one primary classification, checked in this
//! order: orphan annotation, orphan image, malformed annotation, duplicate
//! image, empty annotation. Keys that pass all checks are clean. The report
//! is informational only and never touches the corpus.

use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::checksum::compute_file_checksum;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::index::{CorpusEntry, CorpusIndex};
use crate::split::SplitCandidate;
use crate::types::{AnnotationRecord, ImageSize, Violation, ViolationKind};
use crate::utils::{create_io_thread_pool, create_progress_bar};

/// Boxes may overshoot the image border by this many pixels (rounding in annotation tools).
const BOUNDS_TOLERANCE_PX: f64 = 0.5;

/// Classification of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub kind: Option<ViolationKind>,
    pub object_count: usize,
    pub dominant_label: Option<String>,
}

impl EntryStatus {
    /// Whether this key can take part in a split and an export.
    pub fn is_splittable(&self) -> bool {
        self.kind.map_or(true, |kind| kind.is_warning())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionStats {
    pub images: usize,
    pub min_width: u32,
    pub max_width: u32,
    pub mean_width: f64,
    pub min_height: u32,
    pub max_height: u32,
    pub mean_height: f64,
}

impl DimensionStats {
    fn from_sizes(sizes: &[ImageSize]) -> Option<Self> {
        if sizes.is_empty() {
            return None;
        }
        let n = sizes.len() as f64;
        Some(Self {
            images: sizes.len(),
            min_width: sizes.iter().map(|s| s.width).min().unwrap_or(0),
            max_width: sizes.iter().map(|s| s.width).max().unwrap_or(0),
            mean_width: sizes.iter().map(|s| s.width as f64).sum::<f64>() / n,
            min_height: sizes.iter().map(|s| s.height).min().unwrap_or(0),
            max_height: sizes.iter().map(|s| s.height).max().unwrap_or(0),
            mean_height: sizes.iter().map(|s| s.height as f64).sum::<f64>() / n,
        })
    }
}

/// Object statistics over the splittable records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationStats {
    pub total_objects: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub dimensions: Option<DimensionStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// One entry per non-clean key, in key order.
    pub violations: Vec<Violation>,
    /// Union of observed labels, first-seen order over keys and objects.
    pub class_labels: Vec<String>,
    pub stats: AnnotationStats,
    statuses: BTreeMap<String, EntryStatus>,
}

impl ValidationReport {
    pub fn total_keys(&self) -> usize {
        self.statuses.len()
    }

    pub fn clean_count(&self) -> usize {
        self.statuses.values().filter(|s| s.kind.is_none()).count()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// Counts per classification; the values sum to `total_keys`.
    pub fn kind_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = ViolationKind::ALL
            .iter()
            .map(|kind| (kind.to_string(), self.count(*kind)))
            .collect();
        counts.insert("clean".to_string(), self.clean_count());
        counts
    }

    pub fn keys_of(&self, kind: ViolationKind) -> Vec<&str> {
        self.violations
            .iter()
            .filter(|v| v.kind == kind)
            .map(|v| v.key.as_str())
            .collect()
    }

    pub fn status(&self, key: &str) -> Option<&EntryStatus> {
        self.statuses.get(key)
    }

    /// Keys eligible for splitting, in key order, with their dominant label.
    pub fn split_candidates(&self) -> Vec<SplitCandidate> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_splittable())
            .map(|(key, status)| SplitCandidate {
                key: key.clone(),
                stratum: status.dominant_label.clone(),
            })
            .collect()
    }

    pub fn print_summary(&self) {
        info!("=== Validation Summary ===");
        info!("Keys checked: {}", self.total_keys());
        info!("Clean: {}", self.clean_count());
        for kind in ViolationKind::ALL {
            let count = self.count(kind);
            if count > 0 {
                warn!("{}: {} ({})", kind, count, self.keys_of(kind).join(", "));
            }
        }
        info!("Classes observed: {}", self.class_labels.join(", "));
    }
}

struct Inspection<'a> {
    key: &'a str,
    entry: &'a CorpusEntry,
    annotation: Option<Result<AnnotationRecord>>,
    checksum: Option<String>,
    size: Option<ImageSize>,
}

/// Classify every key of `index`.
pub fn validate(index: &CorpusIndex, config: &Config) -> Result<ValidationReport> {
    info!("Validating {} keys...", index.len());
    let entries: Vec<(&String, &CorpusEntry)> = index.entries().collect();
    let class_names = index.class_names();

    let pb = create_progress_bar(entries.len() as u64, "Validate", config.show_progress);
    let pool = create_io_thread_pool(config.workers)?;
    let inspections: Vec<Inspection> = pool.install(|| {
        entries
            .par_iter()
            .map(|&(key, entry)| {
                let annotation = entry
                    .annotation
                    .as_ref()
                    .map(|source| source.load(class_names));
                let checksum = entry.image.as_ref().and_then(|image| {
                    compute_file_checksum(&image.path)
                        .inspect_err(|e| {
                            warn!("Cannot checksum {}: {}", image.path.display(), e)
                        })
                        .ok()
                });
                let size = entry.image.as_ref().and_then(|image| image.dimensions());
                pb.inc(1);
                Inspection {
                    key: key.as_str(),
                    entry,
                    annotation,
                    checksum,
                    size,
                }
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut report = ValidationReport::default();
    let mut first_by_checksum: HashMap<String, &str> = HashMap::new();
    let mut sizes = Vec::new();

    for inspection in inspections {
        let key = inspection.key;
        if let Some(size) = inspection.size {
            sizes.push(size);
        }
        let duplicate_of = inspection.checksum.and_then(|checksum| {
            match first_by_checksum.get(&checksum) {
                Some(first) => Some(first.to_string()),
                None => {
                    first_by_checksum.insert(checksum, key);
                    None
                }
            }
        });

        let (kind, detail, record) = classify(
            inspection.entry,
            inspection.annotation,
            inspection.size,
            duplicate_of,
        );

        let status = EntryStatus {
            kind,
            object_count: record.as_ref().map_or(0, |r| r.objects.len()),
            dominant_label: record.as_ref().and_then(|r| r.dominant_label()),
        };
        if status.is_splittable() {
            if let Some(record) = &record {
                for object in &record.objects {
                    if !report.class_labels.contains(&object.class_label) {
                        report.class_labels.push(object.class_label.clone());
                    }
                    *report
                        .stats
                        .class_counts
                        .entry(object.class_label.clone())
                        .or_default() += 1;
                    report.stats.total_objects += 1;
                }
            }
        }
        if let Some(kind) = kind {
            report.violations.push(Violation {
                key: key.to_string(),
                kind,
                detail,
            });
        }
        report.statuses.insert(key.to_string(), status);
    }
    report.stats.dimensions = DimensionStats::from_sizes(&sizes);

    report.print_summary();
    Ok(report)
}

type Classification = (Option<ViolationKind>, String, Option<AnnotationRecord>);

fn classify(
    entry: &CorpusEntry,
    annotation: Option<Result<AnnotationRecord>>,
    header_size: Option<ImageSize>,
    duplicate_of: Option<String>,
) -> Classification {
    let image = match &entry.image {
        Some(image) => image,
        None => {
            let detail = entry
                .annotation
                .as_ref()
                .map(|source| format!("no image for {}", source.path.display()))
                .unwrap_or_default();
            return (Some(ViolationKind::OrphanAnnotation), detail, None);
        }
    };

    let record = match annotation {
        None => {
            let detail = format!("no annotation for {}", image.path.display());
            return (Some(ViolationKind::OrphanImage), detail, None);
        }
        Some(Err(EngineError::MalformedRecord { detail, .. })) => {
            return (Some(ViolationKind::MalformedAnnotation), detail, None);
        }
        Some(Err(other)) => {
            return (Some(ViolationKind::MalformedAnnotation), other.to_string(), None);
        }
        Some(Ok(record)) => record,
    };

    if let Err(detail) = check_objects(&record, header_size) {
        return (Some(ViolationKind::MalformedAnnotation), detail, None);
    }

    if let Some(first) = duplicate_of {
        let detail = format!("same bytes as '{}'", first);
        return (Some(ViolationKind::DuplicateImage), detail, Some(record));
    }

    if record.objects.is_empty() {
        let detail = "annotation has no objects".to_string();
        return (Some(ViolationKind::EmptyAnnotation), detail, Some(record));
    }

    (None, String::new(), Some(record))
}

/// Check labels and box geometry against the image size.
pub fn check_objects(
    record: &AnnotationRecord,
    header_size: Option<ImageSize>,
) -> std::result::Result<(), String> {
    if record.objects.is_empty() {
        return Ok(());
    }
    if let (Some(header), Some(declared)) = (header_size, record.declared_size) {
        if header != declared {
            warn!(
                "'{}': declared size {}x{} differs from image header {}x{}; using the header",
                record.key, declared.width, declared.height, header.width, header.height
            );
        }
    }
    let size = header_size
        .or(record.declared_size)
        .ok_or_else(|| "image dimensions unavailable".to_string())?;
    if size.width == 0 || size.height == 0 {
        return Err(format!("image has zero size {}x{}", size.width, size.height));
    }

    let (w, h) = (size.width as f64, size.height as f64);
    for (index, object) in record.objects.iter().enumerate() {
        if object.class_label.trim().is_empty() {
            return Err(format!("object {}: empty class label", index));
        }
        let b = object.bbox.to_pixel(size);
        if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
            return Err(format!("object {}: non-finite coordinates", index));
        }
        if b.x1 >= b.x2 || b.y1 >= b.y2 {
            return Err(format!(
                "object {}: degenerate box [{}, {}, {}, {}]",
                index, b.x1, b.y1, b.x2, b.y2
            ));
        }
        let tol = BOUNDS_TOLERANCE_PX;
        if b.x1 < -tol || b.y1 < -tol || b.x2 > w + tol || b.y2 > h + tol {
            return Err(format!(
                "object {}: box [{}, {}, {}, {}] outside {}x{} image",
                index, b.x1, b.y1, b.x2, b.y2, size.width, size.height
            ));
        }
    }
    Ok(())
}
