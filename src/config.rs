use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::clean::{CleanMode, CleanPolicy};
use crate::error::Result;
use crate::export::ExportConfig;
use crate::layout::Layout;
use crate::split::{SplitConfig, SplitRatios};
use crate::types::ViolationKind;

/// Integrity checks, reconciliation, splitting and export for an object-detection dataset.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Action to perform
    #[arg(value_enum)]
    pub action: Action,

    /// Dataset root holding images/, annotations/, exports/ and backups/
    #[arg(short = 'd', long = "dataset-dir", default_value = "dataset")]
    pub dataset_dir: PathBuf,

    /// Also remove images that have no annotation when cleaning
    #[arg(long = "remove-orphans")]
    pub remove_orphans: bool,

    /// Violation kinds the clean action acts on (default: both orphan kinds)
    #[arg(long = "act-on", value_enum, value_delimiter = ',')]
    pub act_on: Vec<ViolationKind>,

    /// Move cleaned files to backups/quarantine/<timestamp>/ instead of deleting them
    #[arg(long = "quarantine")]
    pub quarantine: bool,

    /// Report what clean would remove without touching any file
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Proportion of the dataset to use for validation
    #[arg(long = "val-size", default_value_t = 0.2, value_parser = validate_size)]
    pub val_size: f64,

    /// Proportion of the dataset to use for testing
    #[arg(long = "test-size", default_value_t = 0.0, value_parser = validate_size)]
    pub test_size: f64,

    /// Seed for the split permutation
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// Split each dominant-class group separately
    #[arg(long = "stratified")]
    pub stratified: bool,

    /// Export format
    #[arg(long = "format", value_enum, default_value = "yolo")]
    pub format: ExportFormat,

    /// Export directory (default: exports/<format>_dataset under the dataset root)
    #[arg(long = "output")]
    pub output: Option<PathBuf>,

    /// Ordered label list; these labels get class ids 0, 1, ...
    #[arg(long = "labels", value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Worker threads for per-file work (0 = one per CPU)
    #[arg(long = "workers", default_value_t = 0)]
    pub workers: usize,

    /// Print the report as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// Also write the report to reports/dataset_report_<timestamp>.txt
    #[arg(long = "save-report")]
    pub save_report: bool,

    /// Hide progress bars
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

impl Args {
    /// Resolve the flags into the configuration threaded through every action.
    pub fn to_config(&self) -> Result<Config> {
        let mode = if self.quarantine {
            CleanMode::Quarantine
        } else {
            CleanMode::Delete
        };
        let mut clean = CleanPolicy {
            remove_orphan_images: self.remove_orphans,
            mode,
            ..CleanPolicy::default()
        };
        if !self.act_on.is_empty() {
            clean.act_on = self.act_on.iter().copied().collect();
        }

        Ok(Config {
            layout: Layout::new(&self.dataset_dir),
            clean,
            split: SplitConfig {
                ratios: SplitRatios::new(self.val_size, self.test_size)?,
                seed: self.seed,
                stratified: self.stratified,
            },
            export: ExportConfig {
                format: self.format,
                output: self.output.clone(),
                labels: self.labels.clone(),
            },
            workers: self.workers,
            show_progress: !self.no_progress,
            json: self.json,
            save_report: self.save_report,
            dry_run: self.dry_run,
        })
    }
}

/// Everything an action needs to know; passed explicitly, never stored globally.
#[derive(Debug, Clone)]
pub struct Config {
    pub layout: Layout,
    pub clean: CleanPolicy,
    pub split: SplitConfig,
    pub export: ExportConfig,
    pub workers: usize,
    pub show_progress: bool,
    pub json: bool,
    pub save_report: bool,
    pub dry_run: bool,
}

impl Config {
    /// Default settings for the dataset at `root`, with progress bars hidden.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::new(root),
            clean: CleanPolicy::default(),
            split: SplitConfig::default(),
            export: ExportConfig::default(),
            workers: 0,
            show_progress: false,
            json: false,
            save_report: false,
            dry_run: false,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Action {
    /// Index images and annotations
    Scan,
    /// Classify every key and report integrity violations
    Validate,
    /// Remove or quarantine orphaned files
    Clean,
    /// Assign keys to train/val/test and persist the split
    Split,
    /// Write a training-ready dataset
    Export,
    /// Copy the corpus to a timestamped backup
    Backup,
    /// Print dataset statistics and recommendations
    Report,
    /// scan, validate, clean, split, export and report in sequence
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Scan => "scan",
            Action::Validate => "validate",
            Action::Clean => "clean",
            Action::Split => "split",
            Action::Export => "export",
            Action::Backup => "backup",
            Action::Report => "report",
            Action::All => "all",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// Enumeration for the export format
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum, Debug, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Yolo,
    Coco,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Yolo => "yolo",
            ExportFormat::Coco => "coco",
        })
    }
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}
