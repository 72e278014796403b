//! In-memory backup payload: named tables of typed, positional rows.

pub mod codec;
pub mod value;

use thiserror::Error;

use crate::catalog::{settings_table_candidates, SETTINGS_TABLE};
use crate::version::{SchemaVersion, VERSION_SETTING_NAME};

pub use codec::{load, load_file, save, save_file, ARCHIVE_FORMAT, ARCHIVE_FORMAT_VERSION};
pub use value::{ColumnKind, Value};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive not found: {path}")]
    NotFound { path: String },
    #[error("failed to access archive {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse archive document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error("unrecognized schema: {0}")]
    UnrecognizedSchema(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, nullable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable,
        }
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value of `column` in `row`; `Null` when the column is absent.
    pub fn get<'a>(&self, row: &'a Row, column: &str) -> &'a Value {
        const NULL: &Value = &Value::Null;
        self.column_index(column)
            .and_then(|idx| row.get(idx))
            .unwrap_or(NULL)
    }

    /// Appends a row after checking arity, kinds and nullability.
    pub fn push_row(&mut self, row: Row) -> Result<(), ArchiveError> {
        self.check_row(&row)?;
        self.rows.push(row);
        Ok(())
    }

    /// Overwrites one cell, with the same checks as `push_row`.
    pub fn set(&mut self, row: usize, column: &str, value: Value) -> Result<(), ArchiveError> {
        let idx = self.column_index(column).ok_or_else(|| {
            ArchiveError::Malformed(format!("table {} has no column {column}", self.name))
        })?;
        self.check_cell(&self.columns[idx], &value, row)?;
        match self.rows.get_mut(row) {
            Some(cells) => {
                cells[idx] = value;
                Ok(())
            }
            None => Err(ArchiveError::Malformed(format!(
                "table {} has no row {row}",
                self.name
            ))),
        }
    }

    pub fn retain_rows<F: FnMut(&Row) -> bool>(&mut self, keep: F) {
        self.rows.retain(keep);
    }

    fn check_row(&self, row: &Row) -> Result<(), ArchiveError> {
        if row.len() != self.columns.len() {
            return Err(ArchiveError::Malformed(format!(
                "table {} row {}: expected {} values, got {}",
                self.name,
                self.rows.len(),
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            self.check_cell(column, value, self.rows.len())?;
        }
        Ok(())
    }

    fn check_cell(&self, column: &Column, value: &Value, row: usize) -> Result<(), ArchiveError> {
        match value.kind() {
            None if !column.nullable => Err(ArchiveError::Malformed(format!(
                "table {} row {row}: column {} is not nullable",
                self.name, column.name
            ))),
            Some(kind) if kind != column.kind => Err(ArchiveError::Malformed(format!(
                "table {} row {row}: column {} expects {}, found {kind}",
                self.name, column.name, column.kind
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    tables: Vec<Table>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Adds a table, replacing any existing table with the same name in place.
    pub fn put_table(&mut self, table: Table) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        let idx = self.tables.iter().position(|t| t.name == name)?;
        Some(self.tables.remove(idx))
    }

    pub fn settings_table(&self) -> Option<&Table> {
        settings_table_candidates()
            .iter()
            .find_map(|name| self.table(name))
    }

    fn settings_table_name(&self) -> Option<&'static str> {
        settings_table_candidates()
            .iter()
            .copied()
            .find(|name| self.has_table(name))
    }
}

/// Schema version recorded in the archive's settings table.
///
/// No settings table, or not exactly one marker row, is `UnrecognizedSchema`.
/// A marker whose value is not a known version is `Unknown`.
pub fn detect_version(archive: &Archive) -> Result<SchemaVersion, ArchiveError> {
    let settings = archive.settings_table().ok_or_else(|| {
        ArchiveError::UnrecognizedSchema(format!(
            "no settings table (looked for {:?})",
            settings_table_candidates()
        ))
    })?;
    let markers: Vec<&Value> = settings
        .rows()
        .iter()
        .filter(|row| settings.get(row, "SettingName").as_str() == Some(VERSION_SETTING_NAME))
        .map(|row| settings.get(row, "SettingValue"))
        .collect();
    match markers.as_slice() {
        [value] => Ok(value
            .as_str()
            .map(SchemaVersion::parse)
            .unwrap_or(SchemaVersion::Unknown)),
        [] => Err(ArchiveError::UnrecognizedSchema(format!(
            "{} has no {VERSION_SETTING_NAME} row",
            settings.name
        ))),
        many => Err(ArchiveError::UnrecognizedSchema(format!(
            "{} has {} {VERSION_SETTING_NAME} rows",
            settings.name,
            many.len()
        ))),
    }
}

/// Rewrites the marker in whichever settings table the archive carries,
/// creating a modern `AppSetting` table when there is none.
pub fn set_version(archive: &mut Archive, version: SchemaVersion) -> Result<(), ArchiveError> {
    let name = match archive.settings_table_name() {
        Some(name) => name,
        None => {
            archive.put_table(settings_table_template(SETTINGS_TABLE));
            SETTINGS_TABLE
        }
    };
    let Some(settings) = archive.table_mut(name) else {
        return Err(ArchiveError::Malformed(format!("{name} vanished")));
    };
    let existing = settings
        .rows()
        .iter()
        .position(|row| settings.get(row, "SettingName").as_str() == Some(VERSION_SETTING_NAME));
    match existing {
        Some(idx) => settings.set(idx, "SettingValue", Value::text(version.as_str())),
        None => {
            let next_id = next_integer_id(settings, "AppSettingId");
            let mut row = Vec::with_capacity(settings.columns().len());
            for column in settings.columns() {
                row.push(match column.name.as_str() {
                    "AppSettingId" => Value::Integer(next_id),
                    "SettingName" => Value::text(VERSION_SETTING_NAME),
                    "SettingValue" => Value::text(version.as_str()),
                    _ => Value::Null,
                });
            }
            settings.push_row(row)
        }
    }
}

/// Empty settings table with the standard three columns.
pub fn settings_table_template(name: &str) -> Table {
    Table::new(
        name,
        vec![
            Column::new("AppSettingId", ColumnKind::Integer, false),
            Column::new("SettingName", ColumnKind::String, false),
            Column::new("SettingValue", ColumnKind::String, false),
        ],
    )
}

/// One past the largest integer in `column`, starting at 1.
pub fn next_integer_id(table: &Table, column: &str) -> i64 {
    table
        .rows()
        .iter()
        .filter_map(|row| table.get(row, column).as_i64())
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(rows: &[(&str, &str)], table: &str) -> Archive {
        let mut settings = settings_table_template(table);
        for (idx, (name, value)) in rows.iter().enumerate() {
            settings
                .push_row(vec![
                    Value::Integer(idx as i64 + 1),
                    Value::text(*name),
                    Value::text(*value),
                ])
                .unwrap();
        }
        let mut archive = Archive::new();
        archive.put_table(settings);
        archive
    }

    #[test]
    fn push_row_rejects_wrong_arity_kind_and_null() {
        let mut table = settings_table_template("AppSetting");
        let err = table.push_row(vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(msg) if msg.contains("expected 3 values")));

        let err = table
            .push_row(vec![Value::text("1"), Value::text("a"), Value::text("b")])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(msg) if msg.contains("expects integer")));

        let err = table
            .push_row(vec![Value::Integer(1), Value::Null, Value::text("b")])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(msg) if msg.contains("not nullable")));
        assert!(table.is_empty());
    }

    #[test]
    fn detects_version_in_either_settings_table() {
        let modern = settings_with(&[("DataSchemaVersion", "4.4.3")], "AppSetting");
        assert_eq!(detect_version(&modern).unwrap(), SchemaVersion::V4_4_3);

        let legacy = settings_with(&[("DataSchemaVersion", "2.6.0")], "gs_AppSetting");
        assert_eq!(detect_version(&legacy).unwrap(), SchemaVersion::V2_6_0);
    }

    #[test]
    fn unknown_marker_degrades_to_unknown() {
        let archive = settings_with(&[("DataSchemaVersion", "9.1.0")], "AppSetting");
        assert_eq!(detect_version(&archive).unwrap(), SchemaVersion::Unknown);
    }

    #[test]
    fn missing_or_duplicate_marker_is_unrecognized() {
        let empty = Archive::new();
        assert!(matches!(
            detect_version(&empty),
            Err(ArchiveError::UnrecognizedSchema(_))
        ));

        let no_marker = settings_with(&[("Other", "x")], "AppSetting");
        assert!(matches!(
            detect_version(&no_marker),
            Err(ArchiveError::UnrecognizedSchema(_))
        ));

        let twice = settings_with(
            &[("DataSchemaVersion", "3.0.0"), ("DataSchemaVersion", "3.0.1")],
            "AppSetting",
        );
        assert!(matches!(
            detect_version(&twice),
            Err(ArchiveError::UnrecognizedSchema(msg)) if msg.contains("2")
        ));
    }

    #[test]
    fn set_version_updates_in_place_or_inserts() {
        let mut archive = settings_with(&[("Other", "x")], "gs_AppSetting");
        set_version(&mut archive, SchemaVersion::V3_0_0).unwrap();
        assert_eq!(detect_version(&archive).unwrap(), SchemaVersion::V3_0_0);
        set_version(&mut archive, SchemaVersion::V3_0_1).unwrap();
        assert_eq!(detect_version(&archive).unwrap(), SchemaVersion::V3_0_1);
        assert_eq!(archive.table("gs_AppSetting").unwrap().len(), 2);

        let mut bare = Archive::new();
        set_version(&mut bare, SchemaVersion::CURRENT).unwrap();
        assert_eq!(detect_version(&bare).unwrap(), SchemaVersion::CURRENT);
    }
}
