//! Versioned data migration and backup/restore for media gallery stores.
//!
//! Archives are self-describing JSON snapshots of the gallery and membership
//! tables. Restoring one reshapes legacy layouts in memory, replaces the
//! selected tables inside a single transaction and then walks the store
//! forward, one schema version at a time, to [`version::SchemaVersion::CURRENT`].

pub mod admin;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod migrations;
pub mod report;
pub mod reshape;
pub mod schema;
pub mod store;
pub mod transfer;
pub mod validate;
pub mod version;

pub use error::{AppError, AppResult, BackupError, BackupResult};
