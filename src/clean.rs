//! Reconciler: removes or quarantines orphaned files under an explicit policy.
//!
//! Only the two orphan kinds have a removal policy. Malformed annotations,
//! duplicate images and empty annotations are reported for manual resolution
//! and asking to act on them is a `ReconcileConflict`.

use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::index::CorpusIndex;
use crate::layout::Layout;
use crate::types::ViolationKind;
use crate::utils::{timestamp_slug, unique_child};
use crate::validate::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanMode {
    #[default]
    Delete,
    /// Move files under `backups/quarantine/<timestamp>/`
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanPolicy {
    pub act_on: BTreeSet<ViolationKind>,
    /// Orphan images are kept unless this is set, even when `act_on` names them
    pub remove_orphan_images: bool,
    pub mode: CleanMode,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        Self {
            act_on: [ViolationKind::OrphanImage, ViolationKind::OrphanAnnotation]
                .into_iter()
                .collect(),
            remove_orphan_images: false,
            mode: CleanMode::Delete,
        }
    }
}

impl CleanPolicy {
    fn has_removal_policy(kind: ViolationKind) -> bool {
        matches!(
            kind,
            ViolationKind::OrphanImage | ViolationKind::OrphanAnnotation
        )
    }

    /// Fail on the first requested kind that has no removal policy.
    fn check(&self, report: &ValidationReport) -> Result<()> {
        match self
            .act_on
            .iter()
            .find(|kind| !Self::has_removal_policy(**kind))
        {
            Some(kind) => Err(EngineError::ReconcileConflict {
                kind: *kind,
                keys: report
                    .keys_of(*kind)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            }),
            None => Ok(()),
        }
    }

    fn removes(&self, kind: ViolationKind) -> bool {
        self.act_on.contains(&kind)
            && match kind {
                ViolationKind::OrphanAnnotation => true,
                ViolationKind::OrphanImage => self.remove_orphan_images,
                _ => false,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRemoval {
    pub key: String,
    pub kind: ViolationKind,
    pub path: PathBuf,
}

/// The dry-run result of `clean`: what would be removed and what is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanPlan {
    pub mode: CleanMode,
    pub removals: Vec<PlannedRemoval>,
    /// Flagged keys left in place, per kind
    pub retained: BTreeMap<ViolationKind, usize>,
}

impl CleanPlan {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.removals.iter().filter(|r| r.kind == kind).count()
    }

    pub fn print_summary(&self) {
        info!("=== Clean Plan ===");
        info!(
            "Files to {}: {} ({} orphan annotations, {} orphan images)",
            match self.mode {
                CleanMode::Delete => "delete",
                CleanMode::Quarantine => "quarantine",
            },
            self.removals.len(),
            self.count(ViolationKind::OrphanAnnotation),
            self.count(ViolationKind::OrphanImage)
        );
        for (kind, count) in &self.retained {
            info!("Retained {}: {}", kind, count);
        }
    }
}

/// Work out which files `policy` removes. Touches nothing on disk.
pub fn plan(
    index: &CorpusIndex,
    report: &ValidationReport,
    policy: &CleanPolicy,
) -> Result<CleanPlan> {
    policy.check(report)?;

    let mut plan = CleanPlan {
        mode: policy.mode,
        ..CleanPlan::default()
    };
    for violation in &report.violations {
        let entry = index.get(&violation.key);
        let path = match violation.kind {
            ViolationKind::OrphanAnnotation => {
                entry.and_then(|e| e.annotation.as_ref()).map(|a| a.path.clone())
            }
            ViolationKind::OrphanImage => entry.and_then(|e| e.image.as_ref()).map(|i| i.path.clone()),
            _ => None,
        };
        match path {
            Some(path) if policy.removes(violation.kind) => plan.removals.push(PlannedRemoval {
                key: violation.key.clone(),
                kind: violation.kind,
                path,
            }),
            _ => *plan.retained.entry(violation.kind).or_default() += 1,
        }
    }

    plan.print_summary();
    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanOutcome {
    pub removed: usize,
    /// Files that had already disappeared
    pub skipped: usize,
    pub quarantine_dir: Option<PathBuf>,
}

/// Carry out `plan`. The index is consumed: it no longer reflects the disk.
pub fn apply(plan: CleanPlan, index: CorpusIndex, layout: &Layout) -> Result<CleanOutcome> {
    drop(index);

    let quarantine_dir = match plan.mode {
        CleanMode::Quarantine if !plan.is_empty() => {
            Some(unique_child(&layout.quarantine_dir(), &timestamp_slug()))
        }
        _ => None,
    };

    let mut outcome = CleanOutcome {
        quarantine_dir: quarantine_dir.clone(),
        ..CleanOutcome::default()
    };
    for removal in &plan.removals {
        if !removal.path.exists() {
            warn!(
                "'{}': {} already gone, skipping",
                removal.key,
                removal.path.display()
            );
            outcome.skipped += 1;
            continue;
        }
        match &quarantine_dir {
            Some(dir) => quarantine_file(&removal.path, layout.root(), dir)?,
            None => fs::remove_file(&removal.path)?,
        }
        info!("Removed {} '{}': {}", removal.kind, removal.key, removal.path.display());
        outcome.removed += 1;
    }

    match &outcome.quarantine_dir {
        Some(dir) => info!(
            "Quarantined {} files to {}",
            outcome.removed,
            dir.display()
        ),
        None => info!("Deleted {} files", outcome.removed),
    }
    Ok(outcome)
}

/// Move `path` below `quarantine_dir`, keeping its path relative to `root`.
fn quarantine_file(path: &Path, root: &Path, quarantine_dir: &Path) -> std::io::Result<()> {
    let relative = path
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default());
    let destination = quarantine_dir.join(relative);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(path, &destination).is_err() {
        // Different filesystem
        fs::copy(path, &destination)?;
        fs::remove_file(path)?;
    }
    Ok(())
}
