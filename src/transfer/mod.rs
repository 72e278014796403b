//! Moving whole table sets between an [`Archive`](crate::archive::Archive)
//! and the live store.

pub mod constraints;
pub mod export;
pub mod restore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::catalog::TableKind;
use crate::migrations::MigrationError;
use crate::version::SchemaVersion;

pub use export::export;
pub use restore::{compact_store, restore, restore_with_chain};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("unsupported schema version {version}: {reason}")]
    UnsupportedSchema {
        version: SchemaVersion,
        reason: String,
    },
    #[error("failed to clear table {table}: {source}")]
    Clear {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to load table {table}: {source}")]
    BulkLoad {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to drop constraint {constraint} on {table}: {source}")]
    ConstraintDrop {
        table: String,
        constraint: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to restore constraint {constraint} on {table}: {source}")]
    ConstraintRestore {
        table: String,
        constraint: String,
        #[source]
        source: sqlx::Error,
    },
    /// The restore committed; `report` describes it.
    #[error("restore succeeded; compaction failed: {source}")]
    Compaction {
        #[source]
        source: sqlx::Error,
        report: Box<RestoreReport>,
    },
    #[error("cannot read {table}.{column} from the store: {message}")]
    Decode {
        table: String,
        column: String,
        message: String,
    },
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Which table groups an import replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub include_membership: bool,
    pub include_gallery_data: bool,
}

/// Which table groups an export captures. The settings table is always
/// written so the archive carries its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub include_membership: bool,
    pub include_gallery_data: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            include_membership: true,
            include_gallery_data: true,
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_membership: true,
            include_gallery_data: true,
        }
    }
}

fn selected_kinds(include_membership: bool, include_gallery_data: bool) -> Vec<TableKind> {
    let mut kinds = Vec::with_capacity(2);
    if include_membership {
        kinds.push(TableKind::Membership);
    }
    if include_gallery_data {
        kinds.push(TableKind::Gallery);
    }
    kinds
}

impl ImportOptions {
    pub fn kinds(&self) -> Vec<TableKind> {
        selected_kinds(self.include_membership, self.include_gallery_data)
    }
}

impl ExportOptions {
    pub fn kinds(&self) -> Vec<TableKind> {
        selected_kinds(self.include_membership, self.include_gallery_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub source_version: SchemaVersion,
    pub final_version: SchemaVersion,
    /// Rows inserted per table.
    pub tables: BTreeMap<String, u64>,
    pub steps_applied: Vec<String>,
    pub compacted: bool,
}

pub fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}
