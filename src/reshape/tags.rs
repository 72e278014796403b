//! List-valued metadata (tags, people): normalization and fan-out into
//! `Tag` / `MetadataTag`.

use std::collections::{BTreeSet, HashSet};

use crate::archive::{ArchiveError, Column, ColumnKind, Table, Value};

/// Longest single tag kept; longer items are cut at a char boundary.
pub const MAX_TAG_LEN: usize = 100;
pub const TAG_SEPARATOR: &str = ", ";

/// Splits on `;` or `,`, trims, strips quote characters, caps each item,
/// drops empties and keeps the first occurrence of duplicates.
pub fn normalize_items(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for piece in raw.split([';', ',']) {
        let stripped: String = piece.chars().filter(|c| *c != '"' && *c != '\'').collect();
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            continue;
        }
        let capped: String = trimmed.chars().take(MAX_TAG_LEN).collect();
        let capped = capped.trim_end().to_string();
        if seen.insert(capped.clone()) {
            items.push(capped);
        }
    }
    items
}

/// Canonical stored form of a list value.
pub fn normalize_list(raw: &str) -> String {
    normalize_items(raw).join(TAG_SEPARATOR)
}

/// Accumulates `Tag` catalog entries and `MetadataTag` links.
///
/// Both sets are keyed, so feeding the same fact twice adds nothing.
#[derive(Debug, Default)]
pub struct TagFanOut {
    tags: BTreeSet<String>,
    links: BTreeSet<(i64, String, i64)>,
}

impl TagFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, metadata_id: i64, gallery_id: i64, items: &[String]) {
        for item in items {
            self.tags.insert(item.clone());
            self.links.insert((metadata_id, item.clone(), gallery_id));
        }
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn into_tables(self) -> Result<(Table, Table), ArchiveError> {
        let mut tag = tag_table();
        for name in self.tags {
            tag.push_row(vec![Value::String(name)])?;
        }
        let mut metadata_tag = metadata_tag_table();
        for (metadata_id, name, gallery_id) in self.links {
            metadata_tag.push_row(vec![
                Value::Integer(metadata_id),
                Value::String(name),
                Value::Integer(gallery_id),
            ])?;
        }
        Ok((tag, metadata_tag))
    }
}

pub fn tag_table() -> Table {
    Table::new("Tag", vec![Column::new("TagName", ColumnKind::String, false)])
}

pub fn metadata_tag_table() -> Table {
    Table::new(
        "MetadataTag",
        vec![
            Column::new("FKMetadataId", ColumnKind::Integer, false),
            Column::new("FKTagName", ColumnKind::String, false),
            Column::new("FKGalleryId", ColumnKind::Integer, false),
        ],
    )
}
