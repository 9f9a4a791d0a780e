//! Dataset report: counts, class balance, disk usage and recommendations.

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use crate::error::Result;
use crate::index::CorpusIndex;
use crate::layout::Layout;
use crate::split::load_split;
use crate::types::{Partition, ScanSummary, Violation, ViolationKind};
use crate::utils::{directory_usage, timestamp_slug, write_atomic};
use crate::validate::{AnnotationStats, ValidationReport};

/// Violations listed in full; the rest are only counted.
const MAX_LISTED_VIOLATIONS: usize = 10;
const MIN_ANNOTATED_SHARE: f64 = 0.8;
const MAX_CLASS_IMBALANCE: usize = 5;
const MIN_RECOMMENDED_BOXES: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub bytes: u64,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub seed: u64,
    pub counts: BTreeMap<Partition, usize>,
}

/// Earliest and latest capture time over the raw images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureSpan {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub generated_at: String,
    pub dataset_root: PathBuf,
    pub scan: ScanSummary,
    pub capture_span: Option<CaptureSpan>,
    /// Files under the corpus directories that are neither images nor annotations
    pub skipped_files: Vec<PathBuf>,
    /// Keys per classification, `clean` included
    pub classifications: BTreeMap<String, usize>,
    pub split: Option<SplitSummary>,
    pub annotations: AnnotationStats,
    /// Usage per top-level area of the dataset root
    pub disk_usage: BTreeMap<String, DiskUsage>,
    pub total_violations: usize,
    pub violations: Vec<Violation>,
    pub recommendations: Vec<String>,
}

impl DatasetReport {
    pub fn build(index: &CorpusIndex, validation: &ValidationReport, layout: &Layout) -> Result<Self> {
        let scan = index.summary();
        let split = load_split(layout)?.map(|persisted| {
            let counts = persisted.to_assignment().counts();
            SplitSummary {
                seed: persisted.seed,
                counts,
            }
        });

        let mut disk_usage = BTreeMap::new();
        for area in ["images", "annotations", "exports", "backups"] {
            let (bytes, files) = directory_usage(&layout.root().join(area));
            disk_usage.insert(area.to_string(), DiskUsage { bytes, files });
        }

        let captured: Vec<DateTime<Utc>> = index
            .entries()
            .filter_map(|(_, entry)| entry.image.as_ref()?.captured_at())
            .collect();
        let capture_span = match (captured.iter().min(), captured.iter().max()) {
            (Some(first), Some(last)) => Some(CaptureSpan {
                first: *first,
                last: *last,
            }),
            _ => None,
        };
        let skipped_files = index
            .skipped()
            .iter()
            .map(|path| path.strip_prefix(layout.root()).unwrap_or(path).to_path_buf())
            .collect();

        let recommendations = recommendations(&scan, validation);
        Ok(Self {
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            dataset_root: layout.root().to_path_buf(),
            scan,
            capture_span,
            skipped_files,
            classifications: validation.kind_counts(),
            split,
            annotations: validation.stats.clone(),
            disk_usage,
            total_violations: validation.violations.len(),
            violations: validation
                .violations
                .iter()
                .take(MAX_LISTED_VIOLATIONS)
                .cloned()
                .collect(),
            recommendations,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.disk_usage.values().map(|usage| usage.bytes).sum()
    }

    /// One line of `key=value` pairs for scripts.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "summary images={} annotated={} unannotated={} orphan_annotations={}",
            self.scan.total_images,
            self.scan.annotated_images,
            self.scan.unannotated_images,
            self.scan.orphan_annotations
        );
        for (kind, count) in &self.classifications {
            let _ = write!(line, " {}={}", kind, count);
        }
        for partition in [Partition::Train, Partition::Val, Partition::Test] {
            let count = self
                .split
                .as_ref()
                .and_then(|split| split.counts.get(&partition).copied())
                .unwrap_or(0);
            let _ = write!(line, " {}={}", partition, count);
        }
        let _ = write!(
            line,
            " objects={} classes={} bytes={}",
            self.annotations.total_objects,
            self.annotations.class_counts.len(),
            self.total_bytes()
        );
        line
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let scan = &self.scan;
        let annotated_pct = percentage(scan.annotated_images, scan.total_images);

        let _ = writeln!(out, "=== Dataset Report ===");
        let _ = writeln!(out, "Dataset: {}", self.dataset_root.display());
        let _ = writeln!(out, "Generated: {}", self.generated_at);
        let _ = writeln!(out);
        let _ = writeln!(out, "Overview");
        let _ = writeln!(out, "  Total images:         {}", scan.total_images);
        let _ = writeln!(
            out,
            "  Annotated images:     {} ({:.1}%)",
            scan.annotated_images, annotated_pct
        );
        let _ = writeln!(out, "  Unannotated images:   {}", scan.unannotated_images);
        let _ = writeln!(out, "  Orphan annotations:   {}", scan.orphan_annotations);
        let _ = writeln!(out, "  Skipped files:        {}", self.skipped_files.len());
        let _ = writeln!(out, "  Total boxes:          {}", self.annotations.total_objects);
        let _ = writeln!(
            out,
            "  Boxes per image:      {:.1}",
            self.annotations.total_objects as f64 / scan.annotated_images.max(1) as f64
        );

        if let Some(span) = &self.capture_span {
            let _ = writeln!(
                out,
                "  Captured:             {} to {}",
                span.first.format("%Y-%m-%d %H:%M:%S"),
                span.last.format("%Y-%m-%d %H:%M:%S")
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Classification");
        for (kind, count) in &self.classifications {
            let _ = writeln!(out, "  {:<22}{}", kind, count);
        }

        if !self.annotations.class_counts.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Classes");
            for (label, count) in &self.annotations.class_counts {
                let pct = percentage(*count, self.annotations.total_objects);
                let filled = (pct / 2.0) as usize;
                let _ = writeln!(
                    out,
                    "  {:<12} {:>5} ({:>5.1}%) {}{}",
                    label,
                    count,
                    pct,
                    "#".repeat(filled),
                    ".".repeat(50usize.saturating_sub(filled))
                );
            }
        }

        if let Some(dims) = &self.annotations.dimensions {
            let _ = writeln!(out);
            let _ = writeln!(out, "Image dimensions ({} images)", dims.images);
            let _ = writeln!(
                out,
                "  Width:  min {}, max {}, mean {:.0}",
                dims.min_width, dims.max_width, dims.mean_width
            );
            let _ = writeln!(
                out,
                "  Height: min {}, max {}, mean {:.0}",
                dims.min_height, dims.max_height, dims.mean_height
            );
        }

        if let Some(split) = &self.split {
            let _ = writeln!(out);
            let _ = writeln!(out, "Split (seed {})", split.seed);
            for (partition, count) in &split.counts {
                let _ = writeln!(out, "  {:<6}{}", partition, count);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Disk usage");
        for (area, usage) in &self.disk_usage {
            let _ = writeln!(
                out,
                "  {:<12} {} files, {} bytes",
                area, usage.files, usage.bytes
            );
        }

        if self.total_violations > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "Violations ({})", self.total_violations);
            for violation in &self.violations {
                let _ = writeln!(
                    out,
                    "  {} [{}] {}",
                    violation.key, violation.kind, violation.detail
                );
            }
            if self.total_violations > self.violations.len() {
                let _ = writeln!(
                    out,
                    "  ... and {} more",
                    self.total_violations - self.violations.len()
                );
            }
        }

        if !self.skipped_files.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Skipped files");
            for path in &self.skipped_files {
                let _ = writeln!(out, "  {}", path.display());
            }
        }

        if !self.recommendations.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Recommendations");
            for recommendation in &self.recommendations {
                let _ = writeln!(out, "  - {}", recommendation);
            }
        }

        let _ = writeln!(out);
        out.push_str(&self.summary_line());
        out.push('\n');
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the text report to `reports/dataset_report_<timestamp>.txt`.
    pub fn save(&self, layout: &Layout) -> Result<PathBuf> {
        let reports_dir = layout.reports_dir();
        std::fs::create_dir_all(&reports_dir)?;
        let stamp = timestamp_slug();
        let mut path = reports_dir.join(format!("dataset_report_{}.txt", stamp));
        let mut n = 1;
        while path.exists() {
            path = reports_dir.join(format!("dataset_report_{}_{}.txt", stamp, n));
            n += 1;
        }
        write_atomic(&path, self.render_text().as_bytes())?;
        info!("Report saved to: {}", path.display());
        Ok(path)
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn recommendations(scan: &ScanSummary, validation: &ValidationReport) -> Vec<String> {
    let mut out = Vec::new();
    if (scan.annotated_images as f64) < scan.total_images as f64 * MIN_ANNOTATED_SHARE {
        out.push("Annotate more images: less than 80% of the images are annotated".to_string());
    }
    if scan.unannotated_images > 0 || scan.orphan_annotations > 0 {
        out.push("Run clean to reconcile orphaned images and annotations".to_string());
    }
    let malformed = validation.count(ViolationKind::MalformedAnnotation);
    if malformed > 0 {
        out.push(format!("Fix {} malformed annotation(s) by hand", malformed));
    }
    let counts = &validation.stats.class_counts;
    if let (Some(max), Some(min)) = (counts.values().max(), counts.values().min()) {
        if *max > *min * MAX_CLASS_IMBALANCE {
            out.push(
                "Classes are unbalanced (more than 5:1); collect more data for the rarest classes"
                    .to_string(),
            );
        }
    }
    if validation.stats.total_objects < MIN_RECOMMENDED_BOXES {
        out.push("Collect more data: fewer than 1000 boxes in total".to_string());
    }
    out
}
