//! Reads and writes the `DataSchemaVersion` marker of a live store.

use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::settings_table_candidates;
use crate::transfer::quote_ident;
use crate::version::{SchemaVersion, VERSION_SETTING_NAME};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store has no settings table (looked for {0:?})")]
    MissingSettingsTable(&'static [&'static str]),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// First settings table present in the store, in candidate order.
pub async fn settings_table(conn: &mut SqliteConnection) -> Result<Option<&'static str>, sqlx::Error> {
    for candidate in settings_table_candidates() {
        if table_exists(conn, candidate).await? {
            return Ok(Some(*candidate));
        }
    }
    Ok(None)
}

pub async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Current marker of the store. A missing table, missing row or an
/// unrecognised value all read as `Unknown`.
pub async fn get_version(conn: &mut SqliteConnection) -> Result<SchemaVersion, sqlx::Error> {
    let Some(table) = settings_table(conn).await? else {
        debug!(target: "galleryvault", event = "ledger_no_settings_table");
        return Ok(SchemaVersion::Unknown);
    };
    let sql = format!(
        "SELECT SettingValue FROM {} WHERE SettingName = ?1",
        quote_ident(table)
    );
    let raw: Option<String> = sqlx::query_scalar(&sql)
        .bind(VERSION_SETTING_NAME)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(raw
        .as_deref()
        .map(SchemaVersion::parse)
        .unwrap_or(SchemaVersion::Unknown))
}

/// Upserts the marker on the caller's connection, so it commits or rolls
/// back together with whatever else the caller changed.
pub async fn set_version(
    conn: &mut SqliteConnection,
    version: SchemaVersion,
) -> Result<(), LedgerError> {
    let table = settings_table(conn)
        .await?
        .ok_or(LedgerError::MissingSettingsTable(settings_table_candidates()))?;
    let table_ident = quote_ident(table);

    let updated = sqlx::query(&format!(
        "UPDATE {table_ident} SET SettingValue = ?1 WHERE SettingName = ?2"
    ))
    .bind(version.as_str())
    .bind(VERSION_SETTING_NAME)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        sqlx::query(&format!(
            "INSERT INTO {table_ident} (SettingName, SettingValue) VALUES (?1, ?2)"
        ))
        .bind(VERSION_SETTING_NAME)
        .bind(version.as_str())
        .execute(&mut *conn)
        .await?;
    }

    info!(target: "galleryvault", event = "ledger_version_set", table, version = %version);
    Ok(())
}
