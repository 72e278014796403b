//! Opening the relational store the engine reads from and restores into.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::schema;

const PRAGMAS: &[&str] = &["journal_mode", "synchronous", "foreign_keys", "busy_timeout"];

/// Opens (creating if needed) a file-backed store and brings its schema up.
pub async fn open_store(path: &Path, config: &EngineConfig) -> AnyResult<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "galleryvault",
                event = "store_dir_create_failed",
                error = %e,
                path = %parent.display()
            );
            e
        })?;
    }
    info!(target: "galleryvault", event = "store_path", path = %path.display());

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(config.command_timeout)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .with_context(|| format!("opening store {}", path.display()))?;

    schema::apply_schema(&pool).await?;
    log_effective_pragmas(&pool).await;
    Ok(pool)
}

/// A private in-memory store on a single connection, schema applied.
pub async fn open_memory() -> AnyResult<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    schema::apply_schema(&pool).await?;
    Ok(pool)
}

/// True when the `main` database lives in a file (VACUUM is pointless otherwise).
pub async fn is_file_backed(conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let file: Option<String> =
        sqlx::query_scalar("SELECT file FROM pragma_database_list WHERE name = 'main'")
            .fetch_optional(&mut *conn)
            .await?;
    Ok(file.is_some_and(|f| !f.is_empty()))
}

/// Reads back the connection settings actually in effect and logs them.
async fn log_effective_pragmas(pool: &SqlitePool) {
    let mut effective = Vec::with_capacity(PRAGMAS.len());
    for pragma in PRAGMAS {
        let value = match sqlx::query(&format!("PRAGMA {pragma}")).fetch_one(pool).await {
            Ok(row) => row
                .try_get_unchecked::<String, _>(0)
                .unwrap_or_else(|_| "unknown".into()),
            Err(_) => "unknown".into(),
        };
        effective.push((*pragma, value));
    }
    let journal = effective
        .iter()
        .find(|(name, _)| *name == "journal_mode")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    info!(target: "galleryvault", event = "store_open", pragmas = ?effective);
    if !journal.eq_ignore_ascii_case("wal") {
        warn!(target: "galleryvault", event = "store_open_warning", journal_mode = %journal);
    }
}
