#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use galleryvault_lib::archive::{Archive, Column, ColumnKind, Table, Value};
use galleryvault_lib::config::EngineConfig;
use galleryvault_lib::store;
use sqlx::SqlitePool;

pub const LEGACY_TEMPLATE: i64 = i32::MIN as i64;

pub async fn memory_store() -> SqlitePool {
    store::open_memory().await.expect("open in-memory store")
}

pub fn config() -> EngineConfig {
    EngineConfig::without_pauses()
}

fn table(name: &str, columns: &[(&str, ColumnKind)], rows: Vec<Vec<Value>>) -> Table {
    let columns = columns
        .iter()
        .map(|(name, kind)| Column::new(*name, *kind, true))
        .collect();
    let mut table = Table::new(name, columns);
    for row in rows {
        table.push_row(row).unwrap();
    }
    table
}

fn text(value: &str) -> Value {
    Value::text(value)
}

fn int(value: i64) -> Value {
    Value::Integer(value)
}

/// A 2.6.0 archive as the old exporter wrote it: `gs_*` names, the
/// `i32::MIN` template gallery, titles on the entities themselves and loose
/// value encodings. The membership tables are present but empty.
pub fn legacy_archive() -> Archive {
    use ColumnKind::{Integer as I, String as S};

    let mut archive = Archive::new();
    archive.put_table(table(
        "gs_AppSetting",
        &[("AppSettingId", I), ("SettingName", S), ("SettingValue", S)],
        vec![
            vec![int(1), text("DataSchemaVersion"), text("2.6.0")],
            vec![int(2), text("ProductKey"), text("ABC-123")],
        ],
    ));
    archive.put_table(table(
        "gs_Gallery",
        &[
            ("GalleryId", I),
            ("Description", S),
            ("IsTemplate", I),
            ("DateAdded", S),
        ],
        vec![
            vec![int(LEGACY_TEMPLATE), text("Template"), int(1), text("2009-01-01T00:00:00Z")],
            vec![int(1), text("Family"), int(0), text("2012-05-01T08:30:00Z")],
        ],
    ));
    archive.put_table(table(
        "gs_GallerySetting",
        &[
            ("GallerySettingId", I),
            ("FKGalleryId", I),
            ("IsTemplate", I),
            ("SettingName", S),
            ("SettingValue", S),
        ],
        vec![
            vec![int(1), int(1), int(0), text("PageSize"), text("25")],
            vec![int(2), int(1), int(0), text("MaxNumberErrorItems"), text("200")],
            vec![int(3), int(1), int(0), text("MediaObjectTransitionType"), text("1")],
            vec![int(4), int(1), int(0), text("MetadataDisplaySettings"), text("29|41:0")],
            vec![int(5), int(LEGACY_TEMPLATE), int(1), text("PageSize"), text("30")],
        ],
    ));
    archive.put_table(table(
        "gs_Album",
        &[
            ("AlbumId", I),
            ("FKGalleryId", I),
            ("AlbumParentId", I),
            ("DirectoryName", S),
            ("Title", S),
            ("Summary", S),
            ("DateAdded", S),
        ],
        vec![
            vec![int(1), int(1), int(0), text(""), text("All albums"), text("Root"), text("2012-05-01T08:30:00Z")],
            vec![int(2), int(1), int(1), text("vacation"), text("Vacation"), text(""), text("2013-07-04T10:00:00Z")],
        ],
    ));
    archive.put_table(table(
        "gs_MediaObject",
        &[
            ("MediaObjectId", I),
            ("FKAlbumId", I),
            ("Title", S),
            ("OriginalFilename", S),
            ("DateAdded", S),
        ],
        vec![vec![
            int(10),
            int(2),
            text("Beach"),
            text("beach.jpg"),
            text("2013-07-04T10:05:00Z"),
        ]],
    ));
    archive.put_table(table(
        "gs_MediaObjectMetadata",
        &[
            ("MediaObjectMetadataId", I),
            ("FKMediaObjectId", I),
            ("MetadataNameIdentifier", I),
            ("Value", S),
        ],
        vec![
            vec![int(100), int(10), int(52), text("Vacation, New York, 2013")],
            vec![int(101), int(10), int(54), text("9")],
        ],
    ));
    for (name, key) in [
        ("aspnet_Applications", "ApplicationId"),
        ("aspnet_Users", "UserId"),
        ("aspnet_Membership", "UserId"),
        ("aspnet_Roles", "RoleId"),
        ("aspnet_UsersInRoles", "UserId"),
        ("aspnet_Profile", "UserId"),
    ] {
        archive.put_table(table(name, &[(key, S)], Vec::new()));
    }
    archive
}

/// Builds a row for `table` from the named cells; every other column gets
/// null when nullable and a zero value of its kind otherwise.
pub fn row_for(table: &Table, cells: &[(&str, Value)]) -> Vec<Value> {
    table
        .columns()
        .iter()
        .map(|column| {
            if let Some((_, value)) = cells.iter().find(|(name, _)| *name == column.name) {
                return value.clone();
            }
            if column.nullable {
                return Value::Null;
            }
            match column.kind {
                ColumnKind::String => Value::text(""),
                ColumnKind::Integer => Value::Integer(0),
                ColumnKind::Boolean => Value::Boolean(false),
                ColumnKind::Timestamp => Value::Timestamp(chrono::DateTime::default()),
                ColumnKind::Fraction => Value::Fraction {
                    numerator: 0,
                    denominator: 1,
                },
                ColumnKind::Binary => Value::Binary(Vec::new()),
            }
        })
        .collect()
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn gallery_setting(pool: &SqlitePool, gallery: i64, name: &str) -> Option<String> {
    sqlx::query_scalar(
        "SELECT SettingValue FROM GallerySetting WHERE FKGalleryId = ?1 AND SettingName = ?2",
    )
    .bind(gallery)
    .bind(name)
    .fetch_optional(pool)
    .await
    .unwrap()
}

pub async fn app_setting(pool: &SqlitePool, name: &str) -> Option<String> {
    sqlx::query_scalar("SELECT SettingValue FROM AppSetting WHERE SettingName = ?1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .unwrap()
}
