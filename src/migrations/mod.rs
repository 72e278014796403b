//! Version-keyed registry of upgrade steps and the loop that drives it.
//!
//! Every step is registered under the exact version it upgrades from and must
//! leave the data at `from.next()`. The orchestrator never re-enters a step
//! once the marker has moved past it; a step that fails to advance the
//! marker aborts the whole upgrade.

pub mod patch;
pub mod steps;

use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{error, info};

use crate::archive::{self, Archive, ArchiveError};
use crate::config::EngineConfig;
use crate::ledger::{self, LedgerError};
use crate::version::SchemaVersion;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("step {step} must move the schema version from {before} to {expected}, not {after}")]
    InvariantViolation {
        step: String,
        before: SchemaVersion,
        expected: SchemaVersion,
        after: SchemaVersion,
    },
    #[error("step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<MigrationError>,
    },
    #[error("a step from {0} is already registered")]
    DuplicateStep(SchemaVersion),
    #[error("step {name} from {from} must target {expected:?}, not {to}")]
    NonConsecutive {
        name: &'static str,
        from: SchemaVersion,
        to: SchemaVersion,
        expected: Option<SchemaVersion>,
    },
    #[error("invalid data: {0}")]
    Data(String),
    #[error("failed to prepare asset directory {path}: {source}")]
    AssetDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Inputs a store step may need beyond the connection.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub asset_root: Option<PathBuf>,
}

impl StepContext {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            asset_root: config.asset_root.clone(),
        }
    }
}

pub type ArchiveStepFn = fn(&mut Archive) -> Result<(), MigrationError>;
pub type StoreStepFn = for<'c> fn(
    &'c mut SqliteConnection,
    &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>>;

/// What a step operates on.
#[derive(Clone, Copy)]
pub enum StepAction {
    /// Rewrites the in-memory archive before import.
    Archive(ArchiveStepFn),
    /// Edits the live store after import, inside the caller's transaction.
    Store(StoreStepFn),
}

#[derive(Clone, Copy)]
pub struct MigrationStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub name: &'static str,
    pub action: StepAction,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.action {
            StepAction::Archive(_) => "archive",
            StepAction::Store(_) => "store",
        };
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationChain {
    steps: BTreeMap<SchemaVersion, MigrationStep>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every step from the legacy layout up to `SchemaVersion::CURRENT`.
    pub fn standard() -> Result<Self, MigrationError> {
        let mut chain = Self::new();
        for step in steps::standard_steps() {
            chain.register(step)?;
        }
        Ok(chain)
    }

    pub fn register(&mut self, step: MigrationStep) -> Result<(), MigrationError> {
        if self.steps.contains_key(&step.from) {
            return Err(MigrationError::DuplicateStep(step.from));
        }
        let expected = step.from.next();
        if expected != Some(step.to) {
            return Err(MigrationError::NonConsecutive {
                name: step.name,
                from: step.from,
                to: step.to,
                expected,
            });
        }
        self.steps.insert(step.from, step);
        Ok(())
    }

    pub fn step_for(&self, version: SchemaVersion) -> Option<&MigrationStep> {
        self.steps.get(&version)
    }

    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeSummary {
    pub start: SchemaVersion,
    pub end: SchemaVersion,
    pub applied: Vec<String>,
}

/// Brings the store forward one step at a time until no step is registered
/// for its version. Runs entirely on `conn`, so the caller's transaction
/// decides whether any of it sticks.
pub async fn upgrade_store(
    conn: &mut SqliteConnection,
    chain: &MigrationChain,
    ctx: &StepContext,
) -> Result<UpgradeSummary, MigrationError> {
    let start = ledger::get_version(conn).await?;
    let mut current = start;
    let mut applied = Vec::new();

    while let Some(step) = chain.step_for(current) {
        let StepAction::Store(run) = step.action else {
            return Err(MigrationError::Data(format!(
                "store is at {current} but step {} only applies to archives",
                step.name
            )));
        };
        info!(target: "galleryvault", event = "migration_step_start", step = step.name, from = %step.from, to = %step.to);
        run(conn, ctx).await.map_err(|err| {
            error!(target: "galleryvault", event = "migration_step_error", step = step.name, error = %err);
            MigrationError::Step {
                step: step.name.to_string(),
                source: Box::new(err),
            }
        })?;

        let after = ledger::get_version(conn).await?;
        if after != step.to {
            error!(target: "galleryvault", event = "migration_step_off_course", step = step.name, before = %current, expected = %step.to, after = %after);
            return Err(MigrationError::InvariantViolation {
                step: step.name.to_string(),
                before: current,
                expected: step.to,
                after,
            });
        }
        info!(target: "galleryvault", event = "migration_step_applied", step = step.name, version = %after);
        applied.push(step.name.to_string());
        current = after;
    }

    Ok(UpgradeSummary {
        start,
        end: current,
        applied,
    })
}

/// Same loop over an in-memory archive, applying archive steps only and
/// stopping at the first step that needs a live store.
pub fn upgrade_archive(
    archive: &mut Archive,
    chain: &MigrationChain,
) -> Result<UpgradeSummary, MigrationError> {
    let start = archive::detect_version(archive)?;
    let mut current = start;
    let mut applied = Vec::new();

    while let Some(step) = chain.step_for(current) {
        let StepAction::Archive(run) = step.action else {
            break;
        };
        info!(target: "galleryvault", event = "archive_step_start", step = step.name, from = %step.from, to = %step.to);
        run(archive).map_err(|err| MigrationError::Step {
            step: step.name.to_string(),
            source: Box::new(err),
        })?;

        let after = archive::detect_version(archive)?;
        if after != step.to {
            return Err(MigrationError::InvariantViolation {
                step: step.name.to_string(),
                before: current,
                expected: step.to,
                after,
            });
        }
        applied.push(step.name.to_string());
        current = after;
    }

    Ok(UpgradeSummary {
        start,
        end: current,
        applied,
    })
}
