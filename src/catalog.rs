//! Which tables take part in backup/restore, per schema era, in dependency order.

use serde::{Deserialize, Serialize};

use crate::version::SchemaVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    Membership,
    Gallery,
}

/// Gallery id reserved for the template gallery from the baseline onward.
pub const TEMPLATE_GALLERY_ID: i64 = -1;

pub const SETTINGS_TABLE: &str = "AppSetting";
pub const LEGACY_SETTINGS_TABLE: &str = "gs_AppSetting";

const SETTINGS_CANDIDATES: &[&str] = &[SETTINGS_TABLE, LEGACY_SETTINGS_TABLE];

const MEMBERSHIP_TABLES: &[&str] = &[
    "aspnet_Applications",
    "aspnet_Users",
    "aspnet_Membership",
    "aspnet_Roles",
    "aspnet_UsersInRoles",
    "aspnet_Profile",
];

const GALLERY_TABLES: &[&str] = &[
    "AppSetting",
    "Gallery",
    "GallerySetting",
    "GalleryControlSetting",
    "MimeType",
    "MimeTypeGallery",
    "Album",
    "Role",
    "RoleAlbum",
    "MediaObject",
    "Metadata",
    "Tag",
    "MetadataTag",
    "UserGalleryProfile",
    "UiTemplate",
    "UiTemplateAlbum",
    "MediaTemplate",
    "MediaQueue",
    "Event",
    "Synchronize",
];

const LEGACY_GALLERY_TABLES: &[&str] = &[
    "gs_AppSetting",
    "gs_Gallery",
    "gs_GallerySetting",
    "gs_GalleryControlSetting",
    "gs_MimeType",
    "gs_MimeTypeGallery",
    "gs_Album",
    "gs_Role",
    "gs_Role_Album",
    "gs_MediaObject",
    "gs_MediaObjectMetadata",
    "gs_UserGalleryProfile",
    "gs_BrowserTemplate",
    "gs_MediaQueue",
    "gs_AppError",
    "gs_Synchronize",
];

/// Baseline tables never copied out of a legacy archive: the schema seeds
/// newer content for them and the legacy rows would overwrite it.
pub const LEGACY_IMPORT_EXCLUSIONS: &[&str] = &[
    "MimeType",
    "MimeTypeGallery",
    "MediaTemplate",
    "UiTemplate",
    "UiTemplateAlbum",
];

/// A table holding a foreign key to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfReference {
    pub table: &'static str,
    pub constraint: &'static str,
    pub column: &'static str,
}

pub const SELF_REFERENCING: &[SelfReference] = &[SelfReference {
    table: "Album",
    constraint: "fk_album_parent",
    column: "FKAlbumParentId",
}];

/// Tables to populate for `version`, parents before children.
pub fn tables_for(version: SchemaVersion, kind: TableKind) -> &'static [&'static str] {
    match kind {
        TableKind::Membership => MEMBERSHIP_TABLES,
        TableKind::Gallery if version.is_legacy() => LEGACY_GALLERY_TABLES,
        TableKind::Gallery => GALLERY_TABLES,
    }
}

/// Tables to wipe for `version`, children before parents.
pub fn clear_order(version: SchemaVersion, kind: TableKind) -> Vec<&'static str> {
    tables_for(version, kind).iter().rev().copied().collect()
}

pub fn settings_table_candidates() -> &'static [&'static str] {
    SETTINGS_CANDIDATES
}

pub fn is_settings_table(name: &str) -> bool {
    SETTINGS_CANDIDATES.contains(&name)
}

pub fn is_legacy_exclusion(name: &str) -> bool {
    LEGACY_IMPORT_EXCLUSIONS.contains(&name)
}

/// Baseline name of a legacy `gs_*` table. Names outside the legacy catalog
/// (membership tables, already-baseline names) come back unchanged.
pub fn baseline_name(legacy: &str) -> &str {
    match legacy {
        "gs_Role_Album" => "RoleAlbum",
        "gs_MediaObjectMetadata" => "Metadata",
        "gs_BrowserTemplate" => "MediaTemplate",
        "gs_AppError" => "Event",
        other if LEGACY_GALLERY_TABLES.contains(&other) => &other[3..],
        other => other,
    }
}

pub fn self_reference(table: &str) -> Option<&'static SelfReference> {
    SELF_REFERENCING.iter().find(|entry| entry.table == table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn position(list: &[&str], name: &str) -> usize {
        list.iter()
            .position(|t| *t == name)
            .unwrap_or_else(|| panic!("{name} missing"))
    }

    #[test]
    fn parents_precede_children() {
        let tables = tables_for(SchemaVersion::CURRENT, TableKind::Gallery);
        assert_eq!(tables[0], SETTINGS_TABLE);
        for (parent, child) in [
            ("Gallery", "Album"),
            ("Album", "MediaObject"),
            ("MediaObject", "Metadata"),
            ("Metadata", "MetadataTag"),
            ("Tag", "MetadataTag"),
            ("Role", "RoleAlbum"),
            ("UiTemplate", "UiTemplateAlbum"),
            ("MimeType", "MimeTypeGallery"),
        ] {
            assert!(position(tables, parent) < position(tables, child), "{parent} before {child}");
        }
    }

    #[test]
    fn clear_order_is_reverse() {
        let forward = tables_for(SchemaVersion::V4_0_0, TableKind::Gallery);
        let reverse = clear_order(SchemaVersion::V4_0_0, TableKind::Gallery);
        assert_eq!(reverse.first(), forward.last());
        assert_eq!(reverse.last(), forward.first());
        assert_eq!(reverse.len(), forward.len());
    }

    #[test]
    fn legacy_era_uses_prefixed_names() {
        let legacy = tables_for(SchemaVersion::V2_6_0, TableKind::Gallery);
        assert!(legacy.iter().all(|t| t.starts_with("gs_")));
        assert_eq!(legacy[0], LEGACY_SETTINGS_TABLE);
        assert_eq!(
            tables_for(SchemaVersion::V2_6_0, TableKind::Membership),
            tables_for(SchemaVersion::CURRENT, TableKind::Membership)
        );
    }

    #[test]
    fn every_legacy_table_maps_into_the_baseline_catalog() {
        let baseline: HashSet<_> = GALLERY_TABLES.iter().copied().collect();
        for legacy in LEGACY_GALLERY_TABLES {
            let mapped = baseline_name(legacy);
            assert!(baseline.contains(mapped), "{legacy} -> {mapped}");
        }
        assert_eq!(baseline_name("gs_Album"), "Album");
        assert_eq!(baseline_name("aspnet_Users"), "aspnet_Users");
    }

    #[test]
    fn exclusions_are_cataloged_tables() {
        for table in LEGACY_IMPORT_EXCLUSIONS {
            assert!(GALLERY_TABLES.contains(table));
        }
        assert!(self_reference("Album").is_some());
        assert!(self_reference("MediaObject").is_none());
    }
}
