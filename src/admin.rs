//! Operations an administrator runs against a store: the functions behind
//! every `galleryvault` subcommand.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::archive::{self, Archive};
use crate::catalog::{self, TableKind};
use crate::config::EngineConfig;
use crate::error::{BackupError, BackupResult};
use crate::ledger;
use crate::migrations::{self, MigrationChain, StepContext, UpgradeSummary};
use crate::transfer::{self, quote_ident, ExportOptions, ImportOptions, RestoreReport};
use crate::validate::{self, ValidationResult};
use crate::version::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub validation: ValidationResult,
    pub restore: RestoreReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub version: SchemaVersion,
    pub current: SchemaVersion,
    pub pending_steps: Vec<String>,
    pub table_row_counts: BTreeMap<String, u64>,
}

pub fn validate_file(path: &Path) -> BackupResult<ValidationResult> {
    let archive = archive::load_file(path)?;
    Ok(validate::validate_archive(&archive)?)
}

/// Validates, then restores the archive at `path`. An archive the gate
/// rejects never reaches the store.
pub async fn import_file(
    pool: &SqlitePool,
    path: &Path,
    options: &ImportOptions,
    config: &EngineConfig,
) -> BackupResult<ImportOutcome> {
    let archive = archive::load_file(path)?;
    let validation = validate::validate_archive(&archive)?;
    if !validation.is_valid {
        return Err(BackupError::UnsupportedSchema {
            version: validation.version,
            reason: format!(
                "archives older than {} cannot be restored",
                SchemaVersion::OLDEST_RESTORABLE
            ),
        });
    }
    let restore = transfer::restore(pool, archive, options, config).await?;
    info!(target: "galleryvault", event = "import_done", path = %path.display(), version = %restore.final_version);
    Ok(ImportOutcome {
        validation,
        restore,
    })
}

pub async fn export_archive(pool: &SqlitePool, options: &ExportOptions) -> BackupResult<Archive> {
    Ok(transfer::export(pool, options).await?)
}

pub async fn export_bytes(pool: &SqlitePool, options: &ExportOptions) -> BackupResult<Vec<u8>> {
    let archive = export_archive(pool, options).await?;
    Ok(archive::save(&archive)?)
}

/// Exports to `path` and returns the row count of every table written.
pub async fn export_to_file(
    pool: &SqlitePool,
    path: &Path,
    options: &ExportOptions,
) -> BackupResult<BTreeMap<String, u64>> {
    let archive = export_archive(pool, options).await?;
    archive::save_file(&archive, path)?;
    let counts = archive
        .tables()
        .iter()
        .map(|table| (table.name.clone(), table.len() as u64))
        .collect();
    info!(target: "galleryvault", event = "export_done", path = %path.display());
    Ok(counts)
}

/// Runs the store-side upgrade chain on a store whose data is already at
/// the baseline layout or later.
pub async fn upgrade(pool: &SqlitePool, config: &EngineConfig) -> BackupResult<UpgradeSummary> {
    let chain = MigrationChain::standard()?;
    let mut tx = pool.begin().await?;
    let version = ledger::get_version(&mut tx).await?;
    if version < SchemaVersion::BASELINE {
        return Err(BackupError::UnsupportedSchema {
            version,
            reason: "store data predates the baseline layout; restore it from an archive".into(),
        });
    }
    let summary = migrations::upgrade_store(&mut tx, &chain, &StepContext::from_config(config))
        .await?;
    tx.commit().await?;
    if summary.applied.is_empty() {
        info!(target: "galleryvault", event = "upgrade_noop", version = %summary.end);
    }
    Ok(summary)
}

pub async fn status(pool: &SqlitePool) -> BackupResult<StoreStatus> {
    let chain = MigrationChain::standard()?;
    let mut conn = pool.acquire().await?;
    let version = ledger::get_version(&mut conn).await?;

    let mut pending_steps = Vec::new();
    let mut cursor = version;
    while let Some(step) = chain.step_for(cursor) {
        pending_steps.push(step.name.to_string());
        cursor = step.to;
    }

    let mut table_row_counts = BTreeMap::new();
    for kind in [TableKind::Membership, TableKind::Gallery] {
        for name in catalog::tables_for(version, kind) {
            if !ledger::table_exists(&mut conn, name).await? {
                warn!(target: "galleryvault", event = "status_table_missing", table = %name);
                continue;
            }
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)))
                .fetch_one(&mut *conn)
                .await?;
            table_row_counts.insert(name.to_string(), rows.max(0) as u64);
        }
    }

    Ok(StoreStatus {
        version,
        current: SchemaVersion::CURRENT,
        pending_steps,
        table_row_counts,
    })
}
