use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::Action;
use crate::types::ViolationKind;

/// Errors surfaced by the dataset engine.
///
/// Per-record problems (`MalformedRecord`) are normally captured into a
/// validation report; the other variants abort the current action.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dataset root '{}' is unavailable: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("malformed annotation for key '{key}' ({}): {detail}", path.display())]
    MalformedRecord {
        key: String,
        path: PathBuf,
        detail: String,
    },

    #[error("insufficient data: {available} record(s) cannot fill {requested} partition(s)")]
    InsufficientData { available: usize, requested: usize },

    #[error("export incomplete in partition '{partition}' at key '{key}': {detail} (partial output removed)")]
    ExportIncomplete {
        partition: String,
        key: String,
        detail: String,
    },

    #[error("no deletion policy for '{kind}' findings (keys: {})", keys.join(", "))]
    ReconcileConflict {
        kind: ViolationKind,
        keys: Vec<String>,
    },

    #[error("backup to '{}' failed: {detail}", destination.display())]
    BackupFailed {
        destination: PathBuf,
        detail: String,
    },

    #[error("configuration error: {0}")]
    InvalidConfig(String),

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: Action,
        #[source]
        source: Box<EngineError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Io(_) | EngineError::Json(_) => 1,
            EngineError::StorageUnavailable { .. } => 10,
            EngineError::MalformedRecord { .. } => 11,
            EngineError::InsufficientData { .. } => 12,
            EngineError::ExportIncomplete { .. } => 13,
            EngineError::ReconcileConflict { .. } => 14,
            EngineError::BackupFailed { .. } => 15,
            EngineError::InvalidConfig(_) => 16,
            EngineError::StepFailed { source, .. } => source.exit_code(),
        }
    }

    pub(crate) fn malformed(key: &str, path: &std::path::Path, detail: impl ToString) -> Self {
        EngineError::MalformedRecord {
            key: key.to_string(),
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
