use std::collections::BTreeMap;

use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::constraints::{drop_self_reference, restore_self_reference, DroppedConstraint};
use super::{quote_ident, ImportOptions, RestoreReport, TransferError};
use crate::archive::value::{format_fraction, format_timestamp};
use crate::archive::{self, Archive, ArchiveError, Table, Value};
use crate::catalog::{self, TableKind, SELF_REFERENCING};
use crate::config::EngineConfig;
use crate::ledger;
use crate::migrations::{self, MigrationChain, StepContext};
use crate::store;
use crate::version::SchemaVersion;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::String(text) => query.bind(text.clone()),
        Value::Integer(number) => query.bind(*number),
        Value::Boolean(flag) => query.bind(i64::from(*flag)),
        Value::Timestamp(ts) => query.bind(format_timestamp(ts)),
        Value::Fraction {
            numerator,
            denominator,
        } => query.bind(format_fraction(*numerator, *denominator)),
        Value::Binary(bytes) => query.bind(bytes.clone()),
    }
}

/// One prepared `INSERT` naming every archive column, so stored ids are kept.
struct TableInserter {
    table: String,
    sql: String,
}

impl TableInserter {
    fn prepare(table: &Table) -> Self {
        let columns: Vec<String> = table.columns().iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        Self {
            table: table.name.clone(),
            sql,
        }
    }

    async fn insert_all(
        &self,
        conn: &mut SqliteConnection,
        table: &Table,
    ) -> Result<u64, TransferError> {
        let mut inserted = 0;
        for row in table.rows() {
            let query = row
                .iter()
                .fold(sqlx::query(&self.sql), |query, value| bind_value(query, value));
            query
                .execute(&mut *conn)
                .await
                .map_err(|source| TransferError::BulkLoad {
                    table: self.table.clone(),
                    source,
                })?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

/// Replaces the selected table groups of the store with the archive's
/// contents and brings the result up to the current schema version.
pub async fn restore(
    pool: &SqlitePool,
    archive: Archive,
    options: &ImportOptions,
    config: &EngineConfig,
) -> Result<RestoreReport, TransferError> {
    let chain = MigrationChain::standard()?;
    restore_with_chain(pool, archive, options, config, &chain).await
}

pub async fn restore_with_chain(
    pool: &SqlitePool,
    mut archive: Archive,
    options: &ImportOptions,
    config: &EngineConfig,
    chain: &MigrationChain,
) -> Result<RestoreReport, TransferError> {
    let op = Uuid::new_v4();
    let source_version = archive::detect_version(&archive)?;
    if source_version < SchemaVersion::OLDEST_RESTORABLE {
        return Err(TransferError::UnsupportedSchema {
            version: source_version,
            reason: format!(
                "archives older than {} cannot be restored",
                SchemaVersion::OLDEST_RESTORABLE
            ),
        });
    }
    let legacy_origin = source_version.is_legacy();
    info!(target: "galleryvault", event = "restore_start", op = %op, version = %source_version, legacy = legacy_origin);

    let reshaped = migrations::upgrade_archive(&mut archive, chain)?;
    let archive_version = reshaped.end;
    if archive_version.is_legacy() {
        return Err(TransferError::UnsupportedSchema {
            version: archive_version,
            reason: "no archive step reshapes this layout".to_string(),
        });
    }

    let kinds = options.kinds();
    let missing = missing_tables(&archive, archive_version, &kinds, legacy_origin);
    if !missing.is_empty() {
        error!(target: "galleryvault", event = "restore_tables_missing", op = %op, tables = ?missing);
        return Err(ArchiveError::Malformed(format!(
            "archive is missing cataloged tables: {}",
            missing.join(", ")
        ))
        .into());
    }

    let mut tx = pool.begin().await?;
    sqlx::query("PRAGMA defer_foreign_keys = ON")
        .execute(&mut *tx)
        .await?;

    let mut dropped: Vec<DroppedConstraint> = Vec::new();
    if config.drop_self_reference_constraint && kinds.contains(&TableKind::Gallery) {
        for reference in SELF_REFERENCING {
            if let Some(constraint) = drop_self_reference(&mut tx, reference).await? {
                dropped.push(constraint);
            }
        }
    }

    for kind in &kinds {
        clear_tables(&mut tx, archive_version, *kind, legacy_origin, config).await?;
    }

    let mut tables = BTreeMap::new();
    for kind in &kinds {
        for name in catalog::tables_for(archive_version, *kind) {
            if legacy_origin && catalog::is_legacy_exclusion(name) {
                continue;
            }
            let table = archive
                .table(name)
                .ok_or_else(|| ArchiveError::Malformed(format!("archive has no table {name}")))?;
            let inserted = TableInserter::prepare(table).insert_all(&mut tx, table).await?;
            info!(target: "galleryvault", event = "restore_table_loaded", op = %op, table = %name, rows = inserted);
            tables.insert(name.to_string(), inserted);
        }
    }

    if legacy_origin && kinds.contains(&TableKind::Gallery) {
        prune_kept_rows(&mut tx).await?;
    }

    for constraint in dropped.iter().rev() {
        restore_self_reference(&mut tx, constraint).await?;
    }

    let mut steps_applied = Vec::new();
    let final_version = if kinds.contains(&TableKind::Gallery) {
        let ctx = StepContext::from_config(config);
        let summary = migrations::upgrade_store(&mut tx, chain, &ctx).await?;
        if summary.end != SchemaVersion::CURRENT {
            error!(target: "galleryvault", event = "restore_version_short", op = %op, version = %summary.end);
            return Err(TransferError::UnsupportedSchema {
                version: summary.end,
                reason: format!("upgrade stopped before {}", SchemaVersion::CURRENT),
            });
        }
        steps_applied.extend(reshaped.applied);
        steps_applied.extend(summary.applied);
        summary.end
    } else {
        ledger::get_version(&mut tx).await?
    };

    tx.commit().await?;
    info!(target: "galleryvault", event = "restore_committed", op = %op, version = %final_version, steps = steps_applied.len());

    let mut report = RestoreReport {
        source_version,
        final_version,
        tables,
        steps_applied,
        compacted: false,
    };
    if config.compact_after_restore {
        match compact_store(pool, config).await {
            Ok(compacted) => report.compacted = compacted,
            Err(source) => {
                return Err(TransferError::Compaction {
                    source,
                    report: Box::new(report),
                })
            }
        }
    }
    Ok(report)
}

/// Cataloged tables of the selected kinds the archive does not carry. The
/// restore clears every one of them, so an absent table would commit empty.
fn missing_tables(
    archive: &Archive,
    version: SchemaVersion,
    kinds: &[TableKind],
    legacy_origin: bool,
) -> Vec<&'static str> {
    kinds
        .iter()
        .flat_map(|kind| catalog::tables_for(version, *kind).iter().copied())
        .filter(|name| !(legacy_origin && catalog::is_legacy_exclusion(name)))
        .filter(|name| !archive.has_table(name))
        .collect()
}

async fn clear_tables(
    conn: &mut SqliteConnection,
    version: SchemaVersion,
    kind: TableKind,
    legacy_origin: bool,
    config: &EngineConfig,
) -> Result<(), TransferError> {
    for name in catalog::clear_order(version, kind) {
        if legacy_origin && catalog::is_legacy_exclusion(name) {
            continue;
        }
        if !ledger::table_exists(conn, name).await? {
            continue;
        }
        let deleted = sqlx::query(&format!("DELETE FROM {}", quote_ident(name)))
            .execute(&mut *conn)
            .await
            .map_err(|source| TransferError::Clear {
                table: name.to_string(),
                source,
            })?
            .rows_affected();
        info!(target: "galleryvault", event = "restore_table_cleared", table = %name, rows = deleted);
        if !config.clear_pause.is_zero() {
            tokio::time::sleep(config.clear_pause).await;
        }
    }
    Ok(())
}

/// Rows of the tables a legacy import leaves in place can point at galleries
/// or albums the import just replaced; those rows go.
async fn prune_kept_rows(conn: &mut SqliteConnection) -> Result<(), TransferError> {
    const PRUNE: &[&str] = &[
        "DELETE FROM UiTemplateAlbum WHERE FKAlbumId NOT IN (SELECT AlbumId FROM Album) \
         OR FKUiTemplateId IN (SELECT UiTemplateId FROM UiTemplate \
                               WHERE FKGalleryId NOT IN (SELECT GalleryId FROM Gallery))",
        "DELETE FROM UiTemplate WHERE FKGalleryId NOT IN (SELECT GalleryId FROM Gallery)",
        "DELETE FROM MimeTypeGallery WHERE FKGalleryId NOT IN (SELECT GalleryId FROM Gallery)",
    ];
    for sql in PRUNE {
        let pruned = sqlx::query(sql).execute(&mut *conn).await?.rows_affected();
        if pruned > 0 {
            info!(target: "galleryvault", event = "restore_pruned", rows = pruned);
        }
    }
    Ok(())
}

/// `VACUUM` after a committed restore, retried once after a pause. Stores
/// that do not live in a file are skipped.
pub async fn compact_store(pool: &SqlitePool, config: &EngineConfig) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    if !store::is_file_backed(&mut conn).await? {
        return Ok(false);
    }
    if let Err(first) = sqlx::query("VACUUM").execute(&mut *conn).await {
        warn!(target: "galleryvault", event = "compaction_retry", error = %first);
        tokio::time::sleep(config.compaction_retry_pause).await;
        if let Err(source) = sqlx::query("VACUUM").execute(&mut *conn).await {
            error!(target: "galleryvault", event = "compaction_failed", error = %source);
            return Err(source);
        }
    }
    info!(target: "galleryvault", event = "compaction_done");
    Ok(true)
}
