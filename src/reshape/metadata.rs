//! Generic metadata facts and the legacy code-numbering repair.

use std::collections::HashSet;

use crate::archive::{Column, ColumnKind, Table, Value};

pub const META_TITLE: i64 = 29;
pub const META_CAPTION: i64 = 41;
pub const META_TAGS: i64 = 52;
pub const META_PEOPLE: i64 = 53;
pub const META_RATING: i64 = 54;

/// Old -> new code pairs of the oldest numbering scheme. Applied as one
/// simultaneous substitution, never chained.
const DRIFTED_CODES: &[(i64, i64)] = &[(52, 54), (53, 52), (54, 53)];

pub fn is_list_valued(meta_name: i64) -> bool {
    meta_name == META_TAGS || meta_name == META_PEOPLE
}

/// Heuristic for archives written with the oldest numbering, where code 52
/// meant rating and defaulted to `"0"`. A genuine tag literally named `"0"`
/// under the newer scheme trips it too; archives do not record which scheme
/// produced them, so there is nothing better to go on.
pub fn uses_drifted_codes<'a, I>(facts: I) -> bool
where
    I: IntoIterator<Item = (i64, &'a str)>,
{
    facts
        .into_iter()
        .any(|(code, value)| code == META_TAGS && value.trim() == "0")
}

pub fn remap_drifted_code(code: i64) -> i64 {
    DRIFTED_CODES
        .iter()
        .find(|(old, _)| *old == code)
        .map(|(_, new)| *new)
        .unwrap_or(code)
}

/// One row of the baseline `Metadata` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFact {
    pub id: i64,
    pub meta_name: i64,
    pub media_object_id: Option<i64>,
    pub album_id: Option<i64>,
    pub raw_value: Option<String>,
    pub value: String,
}

pub fn metadata_table() -> Table {
    Table::new(
        "Metadata",
        vec![
            Column::new("MetadataId", ColumnKind::Integer, false),
            Column::new("MetaName", ColumnKind::Integer, false),
            Column::new("FKMediaObjectId", ColumnKind::Integer, true),
            Column::new("FKAlbumId", ColumnKind::Integer, true),
            Column::new("RawValue", ColumnKind::String, true),
            Column::new("Value", ColumnKind::String, false),
        ],
    )
}

impl MetadataFact {
    pub fn into_row(self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.meta_name),
            self.media_object_id.map(Value::Integer).unwrap_or(Value::Null),
            self.album_id.map(Value::Integer).unwrap_or(Value::Null),
            self.raw_value.map(Value::String).unwrap_or(Value::Null),
            Value::String(self.value),
        ]
    }
}

/// Hands out metadata ids above everything already in use.
#[derive(Debug)]
pub struct FactIds {
    next: i64,
}

impl FactIds {
    pub fn after(max_existing: Option<i64>) -> Self {
        Self {
            next: max_existing.map(|m| m + 1).unwrap_or(1).max(1),
        }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Title/caption facts for an entity, skipping null or blank text.
pub fn text_fact(
    ids: &mut FactIds,
    meta_name: i64,
    media_object_id: Option<i64>,
    album_id: Option<i64>,
    text: &Value,
) -> Option<MetadataFact> {
    let text = text.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(MetadataFact {
        id: ids.next_id(),
        meta_name,
        media_object_id,
        album_id,
        raw_value: None,
        value: text.to_string(),
    })
}

/// (media object, code) pairs that already have a fact.
pub fn media_codes(facts: &[MetadataFact]) -> HashSet<(i64, i64)> {
    facts
        .iter()
        .filter_map(|fact| fact.media_object_id.map(|media| (media, fact.meta_name)))
        .collect()
}
