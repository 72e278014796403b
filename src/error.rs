use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::migrations::MigrationError;
use crate::transfer::{RestoreReport, TransferError};
use crate::version::SchemaVersion;

/// Failure kinds surfaced by the backup/restore engine.
///
/// Subsystem errors fold into these so callers only ever match on one enum.
/// Every variant except `CompactionFailure` means nothing was committed.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("archive not found: {path}")]
    NotFound { path: String },
    #[error("malformed archive: {0}")]
    MalformedArchive(String),
    #[error("unrecognized schema: {0}")]
    UnrecognizedSchema(String),
    #[error("unsupported schema version {version}: {reason}")]
    UnsupportedSchema {
        version: SchemaVersion,
        reason: String,
    },
    #[error("migration step {step} must move the schema version from {before} to {expected}, not {after}")]
    MigrationStepInvariantViolation {
        step: String,
        before: SchemaVersion,
        expected: SchemaVersion,
        after: SchemaVersion,
    },
    #[error("migration step {step} failed: {message}")]
    MigrationStepFailure { step: String, message: String },
    #[error("bulk load failed for table {table}: {message}")]
    BulkLoadFailure { table: String, message: String },
    #[error("failed to restore constraint {constraint} on {table}: {message}")]
    ConstraintRestoreFailure {
        table: String,
        constraint: String,
        message: String,
    },
    #[error("restore succeeded; compaction failed: {message}")]
    CompactionFailure {
        message: String,
        report: Box<RestoreReport>,
    },
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

pub type BackupResult<T> = std::result::Result<T, BackupError>;

impl BackupError {
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::NotFound { .. } => "ARCHIVE/NOT_FOUND",
            BackupError::MalformedArchive(_) => "ARCHIVE/MALFORMED",
            BackupError::UnrecognizedSchema(_) => "SCHEMA/UNRECOGNIZED",
            BackupError::UnsupportedSchema { .. } => "SCHEMA/UNSUPPORTED",
            BackupError::MigrationStepInvariantViolation { .. } => "MIGRATION/INVARIANT",
            BackupError::MigrationStepFailure { .. } => "MIGRATION/STEP_FAILED",
            BackupError::BulkLoadFailure { .. } => "RESTORE/BULK_LOAD",
            BackupError::ConstraintRestoreFailure { .. } => "RESTORE/CONSTRAINT",
            BackupError::CompactionFailure { .. } => "RESTORE/COMPACTION",
            BackupError::Store(_) => "STORE/ERROR",
            BackupError::Io(_) => "IO/ERROR",
        }
    }

    /// The restore committed and only follow-up maintenance failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BackupError::CompactionFailure { .. })
    }
}

impl From<ArchiveError> for BackupError {
    fn from(error: ArchiveError) -> Self {
        match error {
            ArchiveError::NotFound { path } => BackupError::NotFound { path },
            ArchiveError::UnrecognizedSchema(reason) => BackupError::UnrecognizedSchema(reason),
            ArchiveError::Io { path, source } => {
                BackupError::Io(IoError::new(source.kind(), format!("{path}: {source}")))
            }
            other => BackupError::MalformedArchive(other.to_string()),
        }
    }
}

impl From<MigrationError> for BackupError {
    fn from(error: MigrationError) -> Self {
        match error {
            MigrationError::InvariantViolation {
                step,
                before,
                expected,
                after,
            } => BackupError::MigrationStepInvariantViolation {
                step,
                before,
                expected,
                after,
            },
            MigrationError::Archive(inner) => inner.into(),
            MigrationError::Step { step, source } => match *source {
                MigrationError::Archive(inner) => inner.into(),
                other => BackupError::MigrationStepFailure {
                    step,
                    message: other.to_string(),
                },
            },
            other => BackupError::MigrationStepFailure {
                step: "registry".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<TransferError> for BackupError {
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::UnsupportedSchema { version, reason } => {
                BackupError::UnsupportedSchema { version, reason }
            }
            TransferError::BulkLoad { table, source } => BackupError::BulkLoadFailure {
                table,
                message: source.to_string(),
            },
            TransferError::Clear { table, source } => BackupError::BulkLoadFailure {
                table,
                message: format!("clear phase: {source}"),
            },
            TransferError::ConstraintDrop {
                table,
                constraint,
                source,
            } => BackupError::ConstraintRestoreFailure {
                table,
                constraint,
                message: format!("drop phase: {source}"),
            },
            TransferError::ConstraintRestore {
                table,
                constraint,
                source,
            } => BackupError::ConstraintRestoreFailure {
                table,
                constraint,
                message: source.to_string(),
            },
            TransferError::Compaction { source, report } => BackupError::CompactionFailure {
                message: source.to_string(),
                report,
            },
            TransferError::Decode {
                table,
                column,
                message,
            } => BackupError::MalformedArchive(format!("{table}.{column}: {message}")),
            TransferError::Migration(inner) => inner.into(),
            TransferError::Archive(inner) => inner.into(),
            TransferError::Database(inner) => BackupError::Store(inner),
        }
    }
}

/// A structured error for the administrative boundary (CLI output, reports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            let mut keys: Vec<_> = self.context.iter().collect();
            keys.sort();
            write!(f, "[{}] {} ({:?})", self.code, self.message, keys)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<BackupError> for AppError {
    fn from(error: BackupError) -> Self {
        let app_error = AppError::new(error.code(), error.to_string());
        match &error {
            BackupError::NotFound { path } => app_error.with_context("path", path.clone()),
            BackupError::UnsupportedSchema { version, .. } => {
                app_error.with_context("version", version.to_string())
            }
            BackupError::MigrationStepInvariantViolation {
                step,
                before,
                expected,
                after,
            } => app_error
                .with_context("step", step.clone())
                .with_context("before", before.to_string())
                .with_context("expected", expected.to_string())
                .with_context("after", after.to_string()),
            BackupError::MigrationStepFailure { step, .. } => {
                app_error.with_context("step", step.clone())
            }
            BackupError::BulkLoadFailure { table, .. } => {
                app_error.with_context("table", table.clone())
            }
            BackupError::ConstraintRestoreFailure {
                table, constraint, ..
            } => app_error
                .with_context("table", table.clone())
                .with_context("constraint", constraint.clone()),
            BackupError::CompactionFailure { report, .. } => app_error
                .with_context("restore_committed", "true")
                .with_context("final_version", report.final_version.to_string())
                .with_context("steps_applied", report.steps_applied.len().to_string()),
            _ => app_error,
        }
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

// Only output rendering produces these at the CLI boundary.
impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        AppError::new("OUTPUT/JSON", error.to_string())
    }
}
