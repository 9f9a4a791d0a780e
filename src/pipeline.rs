//! Action dispatch. Every action starts from a fresh scan: the filesystem is
//! the source of truth and no index outlives the action that built it.

use log::{info, warn};

use crate::backup::{backup, BackupManifest};
use crate::clean::{self, CleanOutcome, CleanPlan};
use crate::config::{Action, Config};
use crate::error::{EngineError, Result};
use crate::export::{export, ExportManifest};
use crate::index::CorpusIndex;
use crate::report::DatasetReport;
use crate::split::{load_split, save_split, split, SplitAssignment};
use crate::types::ScanSummary;
use crate::validate::{validate, ValidationReport};

/// Result of one action.
#[derive(Debug)]
pub enum ActionOutcome {
    Scanned(ScanSummary),
    Validated(ValidationReport),
    Cleaned {
        plan: CleanPlan,
        /// `None` for a dry run
        outcome: Option<CleanOutcome>,
    },
    Split(SplitAssignment),
    Exported(ExportManifest),
    BackedUp(BackupManifest),
    Reported(Box<DatasetReport>),
    /// Outcomes of `all`, one per step in execution order
    Chain(Vec<(Action, ActionOutcome)>),
}

/// Run `action` against the dataset of `config`.
pub fn run(action: Action, config: &Config) -> Result<ActionOutcome> {
    match action {
        Action::Scan => scan(config).map(|index| {
            let summary = index.summary();
            summary.print_summary();
            ActionOutcome::Scanned(summary)
        }),
        Action::Validate => {
            let index = scan(config)?;
            validate(&index, config).map(ActionOutcome::Validated)
        }
        Action::Clean => run_clean(config),
        Action::Split => run_split(config).map(ActionOutcome::Split),
        Action::Export => run_export(config).map(ActionOutcome::Exported),
        Action::Backup => {
            let index = scan(config)?;
            backup(&config.layout, &index.summary(), config.show_progress)
                .map(ActionOutcome::BackedUp)
        }
        Action::Report => run_report(config).map(|r| ActionOutcome::Reported(Box::new(r))),
        Action::All => run_all(config).map(ActionOutcome::Chain),
    }
}

/// scan, validate, clean, split, export and report; stops at the first failing step.
fn run_all(config: &Config) -> Result<Vec<(Action, ActionOutcome)>> {
    let steps = [
        Action::Scan,
        Action::Validate,
        Action::Clean,
        Action::Split,
        Action::Export,
        Action::Report,
    ];
    let mut outcomes = Vec::with_capacity(steps.len());
    for step in steps {
        info!("--- {} ---", step);
        let outcome = run(step, config).map_err(|source| EngineError::StepFailed {
            step,
            source: Box::new(source),
        })?;
        outcomes.push((step, outcome));
    }
    info!("All steps completed");
    Ok(outcomes)
}

fn scan(config: &Config) -> Result<CorpusIndex> {
    CorpusIndex::scan(&config.layout)
}

fn run_clean(config: &Config) -> Result<ActionOutcome> {
    let index = scan(config)?;
    let report = validate(&index, config)?;
    let plan = clean::plan(&index, &report, &config.clean)?;
    if config.dry_run {
        info!("Dry run: no files were changed");
        return Ok(ActionOutcome::Cleaned {
            plan,
            outcome: None,
        });
    }

    let outcome = clean::apply(plan.clone(), index, &config.layout)?;
    // Rebuild from disk; the old index is gone with the files it described
    CorpusIndex::scan(&config.layout)?.summary().print_summary();
    Ok(ActionOutcome::Cleaned {
        plan,
        outcome: Some(outcome),
    })
}

fn run_split(config: &Config) -> Result<SplitAssignment> {
    let index = scan(config)?;
    let report = validate(&index, config)?;
    let assignment = split(&report.split_candidates(), &config.split)?;
    save_split(&config.layout, &assignment, &config.split)?;
    Ok(assignment)
}

fn run_export(config: &Config) -> Result<ExportManifest> {
    let index = scan(config)?;
    let report = validate(&index, config)?;
    let candidates = report.split_candidates();

    let persisted = load_split(&config.layout)?
        .filter(|persisted| persisted.matches_config(&config.split))
        .map(|persisted| persisted.to_assignment());
    let assignment = match persisted {
        Some(assignment) if assignment.covers_exactly(&candidates) => {
            info!("Using saved split of {} records", assignment.len());
            assignment
        }
        stale => {
            if stale.is_some() {
                warn!("Saved split no longer matches the corpus; splitting again");
            } else {
                info!("No usable saved split; splitting now");
            }
            let assignment = split(&candidates, &config.split)?;
            save_split(&config.layout, &assignment, &config.split)?;
            assignment
        }
    };

    export(&index, &report, &assignment, config)
}

fn run_report(config: &Config) -> Result<DatasetReport> {
    let index = scan(config)?;
    let validation = validate(&index, config)?;
    let report = DatasetReport::build(&index, &validation, &config.layout)?;

    if config.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    if config.save_report {
        report.save(&config.layout)?;
    }
    Ok(report)
}
