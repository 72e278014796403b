//! JSON exchange document for archives.
//!
//! Every table carries its own column schema so a standalone reader can
//! rebuild typed rows. Readers ignore fields they do not know, which keeps
//! older engines able to open documents written by newer ones.

use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use super::{Archive, ArchiveError, Column, ColumnKind, Table, Value};

/// Discriminator stored in every document.
pub const ARCHIVE_FORMAT: &str = "galleryvault-archive";
/// Highest document layout this build writes.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveDocument {
    format: String,
    format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    tables: Vec<TableDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableDocument {
    name: String,
    columns: Vec<ColumnDocument>,
    #[serde(default)]
    rows: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnDocument {
    name: String,
    kind: ColumnKind,
    #[serde(default = "default_nullable")]
    nullable: bool,
}

fn default_nullable() -> bool {
    true
}

pub fn load(bytes: &[u8]) -> Result<Archive, ArchiveError> {
    let document: ArchiveDocument = serde_json::from_slice(bytes)?;
    if document.format != ARCHIVE_FORMAT {
        return Err(ArchiveError::Malformed(format!(
            "unexpected format {:?}",
            document.format
        )));
    }
    if document.format_version > ARCHIVE_FORMAT_VERSION {
        warn!(
            target: "galleryvault",
            event = "archive_newer_format",
            format_version = document.format_version,
            supported = ARCHIVE_FORMAT_VERSION
        );
    }

    let mut archive = Archive::new();
    let mut seen = HashSet::new();
    for table_doc in document.tables {
        if !seen.insert(table_doc.name.clone()) {
            return Err(ArchiveError::Malformed(format!(
                "table {} appears twice",
                table_doc.name
            )));
        }
        archive.put_table(decode_table(table_doc)?);
    }
    Ok(archive)
}

fn decode_table(doc: TableDocument) -> Result<Table, ArchiveError> {
    let columns: Vec<Column> = doc
        .columns
        .into_iter()
        .map(|c| Column::new(c.name, c.kind, c.nullable))
        .collect();
    let mut table = Table::new(doc.name, columns);
    for (row_idx, raw_row) in doc.rows.into_iter().enumerate() {
        if raw_row.len() != table.columns().len() {
            return Err(ArchiveError::Malformed(format!(
                "table {} row {row_idx}: expected {} values, got {}",
                table.name,
                table.columns().len(),
                raw_row.len()
            )));
        }
        let mut row = Vec::with_capacity(raw_row.len());
        for (column, raw) in table.columns().iter().zip(&raw_row) {
            let value = Value::from_json(column.kind, raw).map_err(|reason| {
                ArchiveError::Malformed(format!(
                    "table {} row {row_idx} column {}: {reason}",
                    table.name, column.name
                ))
            })?;
            row.push(value);
        }
        table.push_row(row)?;
    }
    Ok(table)
}

/// Serializes an archive. Archives without a settings table are refused:
/// the version marker is what lets a later restore pick its migrations.
pub fn save(archive: &Archive) -> Result<Vec<u8>, ArchiveError> {
    if archive.settings_table().is_none() {
        return Err(ArchiveError::UnrecognizedSchema(
            "refusing to save an archive without a settings table".to_string(),
        ));
    }
    let document = ArchiveDocument {
        format: ARCHIVE_FORMAT.to_string(),
        format_version: ARCHIVE_FORMAT_VERSION,
        created_at: Some(Utc::now()),
        tables: archive.tables().iter().map(encode_table).collect(),
    };
    Ok(serde_json::to_vec(&document)?)
}

fn encode_table(table: &Table) -> TableDocument {
    TableDocument {
        name: table.name.clone(),
        columns: table
            .columns()
            .iter()
            .map(|c| ColumnDocument {
                name: c.name.clone(),
                kind: c.kind,
                nullable: c.nullable,
            })
            .collect(),
        rows: table
            .rows()
            .iter()
            .map(|row| row.iter().map(Value::to_json).collect())
            .collect(),
    }
}

pub fn load_file(path: &Path) -> Result<Archive, ArchiveError> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ArchiveError::NotFound {
            path: path.display().to_string(),
        },
        _ => ArchiveError::Io {
            path: path.display().to_string(),
            source: err,
        },
    })?;
    let archive = load(&bytes)?;
    info!(
        target: "galleryvault",
        event = "archive_loaded",
        path = %path.display(),
        bytes = bytes.len(),
        tables = archive.tables().len()
    );
    Ok(archive)
}

/// Writes next to the destination first and renames over it, so a crash
/// never leaves a half-written archive under the final name.
pub fn save_file(archive: &Archive, path: &Path) -> Result<(), ArchiveError> {
    let payload = save(archive)?;
    replace_file(path, |file| {
        file.write_all(&payload)?;
        file.sync_all()
    })?;
    info!(
        target: "galleryvault",
        event = "archive_saved",
        path = %path.display(),
        bytes = payload.len()
    );
    Ok(())
}

/// Runs `write` against `<path>.partial` and renames the result over `path`.
/// The temp file is removed whenever the write or the rename fails.
fn replace_file<F>(path: &Path, write: F) -> Result<(), ArchiveError>
where
    F: FnOnce(&mut fs::File) -> std::io::Result<()>,
{
    let tmp_path = path.with_extension("partial");
    let io_err = |source: std::io::Error, at: &Path| ArchiveError::Io {
        path: at.display().to_string(),
        source,
    };

    let mut file = fs::File::create(&tmp_path).map_err(|err| io_err(err, &tmp_path))?;
    let written = write(&mut file);
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(err, &tmp_path));
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(err, path));
    }
    Ok(())
}
