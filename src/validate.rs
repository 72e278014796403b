//! Pre-flight inspection of an archive before anything touches the store.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::archive::{self, Archive, ArchiveError};
use crate::catalog::{self, TableKind};
use crate::version::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub version: SchemaVersion,
    /// Row counts keyed by baseline table name.
    pub table_row_counts: BTreeMap<String, u64>,
    /// Cataloged tables the archive does not carry (reported by baseline name).
    pub missing_tables: Vec<String>,
    pub is_valid: bool,
}

pub fn validate(bytes: &[u8]) -> Result<ValidationResult, ArchiveError> {
    let archive = archive::load(bytes)?;
    validate_archive(&archive)
}

/// Same checks on an already-parsed archive. Never mutates it.
pub fn validate_archive(archive: &Archive) -> Result<ValidationResult, ArchiveError> {
    let version = archive::detect_version(archive)?;

    let mut table_row_counts = BTreeMap::new();
    let mut missing_tables = Vec::new();
    for kind in [TableKind::Membership, TableKind::Gallery] {
        for name in catalog::tables_for(version, kind) {
            let reported = catalog::baseline_name(name).to_string();
            match archive.table(name) {
                Some(table) => {
                    table_row_counts.insert(reported, table.len() as u64);
                }
                None => {
                    table_row_counts.insert(reported.clone(), 0);
                    missing_tables.push(reported);
                }
            }
        }
    }

    let is_valid = version >= SchemaVersion::OLDEST_RESTORABLE;
    info!(target: "galleryvault", event = "archive_validated", version = %version, valid = is_valid, missing = missing_tables.len());
    Ok(ValidationResult {
        version,
        table_row_counts,
        missing_tables,
        is_valid,
    })
}
