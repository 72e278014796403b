//! One-shot transform of a legacy (2.6.0) archive into the baseline (3.0.0)
//! table layout.

pub mod metadata;
pub mod tags;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::archive::value::{parse_fraction, parse_timestamp};
use crate::archive::{self, Archive, ArchiveError, Column, ColumnKind, Row, Table, Value};
use crate::catalog::{self, TableKind, TEMPLATE_GALLERY_ID};
use crate::version::SchemaVersion;

use metadata::{
    is_list_valued, media_codes, metadata_table, remap_drifted_code, text_fact,
    uses_drifted_codes, FactIds, MetadataFact, META_CAPTION, META_TITLE,
};
use tags::{normalize_items, TagFanOut, TAG_SEPARATOR};

/// Gallery id the legacy schema used to mark the template gallery.
pub const LEGACY_TEMPLATE_GALLERY_ID: i64 = i32::MIN as i64;

type ColumnSpec = (&'static str, ColumnKind, bool);

#[derive(Debug, Clone, Copy)]
enum Fallback {
    Text(&'static str),
    Bool(bool),
}

/// How one legacy table carries over into its baseline successor.
struct TableMap {
    legacy: &'static str,
    columns: &'static [ColumnSpec],
    /// (baseline column, legacy column)
    renames: &'static [(&'static str, &'static str)],
    /// Used when the legacy value is missing or null in a non-null column.
    fallbacks: &'static [(&'static str, Fallback)],
    /// Columns where a legacy `0` meant "none".
    zero_is_null: &'static [&'static str],
}

use ColumnKind::{Boolean as B, Fraction as Fr, Integer as I, String as S, Timestamp as T};

const APP_SETTING: &[ColumnSpec] = &[
    ("AppSettingId", I, false),
    ("SettingName", S, false),
    ("SettingValue", S, false),
];

const GALLERY: &[ColumnSpec] = &[
    ("GalleryId", I, false),
    ("Description", S, false),
    ("IsTemplate", B, false),
    ("DateAdded", T, false),
];

const GALLERY_SETTING: &[ColumnSpec] = &[
    ("GallerySettingId", I, false),
    ("FKGalleryId", I, false),
    ("IsTemplate", B, false),
    ("SettingName", S, false),
    ("SettingValue", S, false),
];

const GALLERY_CONTROL_SETTING: &[ColumnSpec] = &[
    ("GalleryControlSettingId", I, false),
    ("ControlId", S, false),
    ("SettingName", S, false),
    ("SettingValue", S, true),
];

const MIME_TYPE: &[ColumnSpec] = &[
    ("MimeTypeId", I, false),
    ("FileExtension", S, false),
    ("MimeTypeValue", S, false),
    ("BrowserMimeTypeValue", S, false),
];

const MIME_TYPE_GALLERY: &[ColumnSpec] = &[
    ("MimeTypeGalleryId", I, false),
    ("FKGalleryId", I, false),
    ("FKMimeTypeId", I, false),
    ("IsEnabled", B, false),
];

const ALBUM: &[ColumnSpec] = &[
    ("AlbumId", I, false),
    ("FKGalleryId", I, false),
    ("FKAlbumParentId", I, true),
    ("DirectoryName", S, false),
    ("ThumbnailMediaObjectId", I, false),
    ("SortByMetaName", I, false),
    ("SortAscending", B, false),
    ("Seq", I, false),
    ("DateStart", T, true),
    ("DateEnd", T, true),
    ("DateAdded", T, false),
    ("CreatedBy", S, false),
    ("LastModifiedBy", S, false),
    ("DateLastModified", T, false),
    ("OwnedBy", S, false),
    ("OwnerRoleName", S, false),
    ("IsPrivate", B, false),
];

const ROLE: &[ColumnSpec] = &[
    ("RoleName", S, false),
    ("AllowViewAlbumsAndObjects", B, false),
    ("AllowViewOriginalImage", B, false),
    ("AllowAddChildAlbum", B, false),
    ("AllowAddMediaObject", B, false),
    ("AllowEditAlbum", B, false),
    ("AllowEditMediaObject", B, false),
    ("AllowDeleteChildAlbum", B, false),
    ("AllowDeleteMediaObject", B, false),
    ("AllowSynchronize", B, false),
    ("HideWatermark", B, false),
    ("AllowAdministerGallery", B, false),
    ("AllowAdministerSite", B, false),
];

const ROLE_ALBUM: &[ColumnSpec] = &[("FKRoleName", S, false), ("FKAlbumId", I, false)];

const MEDIA_OBJECT: &[ColumnSpec] = &[
    ("MediaObjectId", I, false),
    ("FKAlbumId", I, false),
    ("ThumbnailFilename", S, false),
    ("ThumbnailWidth", I, false),
    ("ThumbnailHeight", I, false),
    ("ThumbnailSizeKB", I, false),
    ("OptimizedFilename", S, false),
    ("OptimizedWidth", I, false),
    ("OptimizedHeight", I, false),
    ("OptimizedSizeKB", I, false),
    ("OriginalFilename", S, false),
    ("OriginalWidth", I, false),
    ("OriginalHeight", I, false),
    ("OriginalSizeKB", I, false),
    ("ExternalHtmlSource", S, true),
    ("ExternalType", S, true),
    ("ExposureTime", Fr, true),
    ("Seq", I, false),
    ("CreatedBy", S, false),
    ("DateAdded", T, false),
    ("LastModifiedBy", S, false),
    ("DateLastModified", T, false),
    ("IsPrivate", B, false),
];

const USER_GALLERY_PROFILE: &[ColumnSpec] = &[
    ("ProfileId", I, false),
    ("UserName", S, false),
    ("FKGalleryId", I, false),
    ("SettingName", S, false),
    ("SettingValue", S, false),
];

const MEDIA_TEMPLATE: &[ColumnSpec] = &[
    ("MediaTemplateId", I, false),
    ("MimeType", S, false),
    ("BrowserId", S, false),
    ("HtmlTemplate", S, false),
    ("ScriptTemplate", S, false),
];

const MEDIA_QUEUE: &[ColumnSpec] = &[
    ("MediaQueueId", I, false),
    ("FKMediaObjectId", I, false),
    ("Status", S, false),
    ("StatusDetail", S, true),
    ("ConversionType", S, false),
    ("RotationAmount", I, false),
    ("DateAdded", T, false),
    ("DateConversionStarted", T, true),
    ("DateConversionCompleted", T, true),
];

const EVENT: &[ColumnSpec] = &[
    ("EventId", I, false),
    ("EventType", S, false),
    ("FKGalleryId", I, false),
    ("TimeStampUtc", T, false),
    ("ExType", S, true),
    ("Message", S, false),
    ("EventData", S, true),
    ("Url", S, true),
];

const SYNCHRONIZE: &[ColumnSpec] = &[
    ("FKGalleryId", I, false),
    ("SynchId", S, false),
    ("SynchState", I, false),
    ("TotalFiles", I, false),
    ("CurrentFileIndex", I, false),
];

const fn plain(legacy: &'static str, columns: &'static [ColumnSpec]) -> TableMap {
    TableMap {
        legacy,
        columns,
        renames: &[],
        fallbacks: &[],
        zero_is_null: &[],
    }
}

const GALLERY_MAP: TableMap = plain("gs_Gallery", GALLERY);

const ALBUM_MAP: TableMap = TableMap {
    legacy: "gs_Album",
    columns: ALBUM,
    renames: &[("FKAlbumParentId", "AlbumParentId")],
    fallbacks: &[("SortAscending", Fallback::Bool(true))],
    zero_is_null: &["FKAlbumParentId"],
};

const MEDIA_OBJECT_MAP: TableMap = plain("gs_MediaObject", MEDIA_OBJECT);

/// Tables that carry over column-for-column (modulo renames/defaults).
const CARRIED: &[TableMap] = &[
    plain("gs_AppSetting", APP_SETTING),
    plain("gs_GallerySetting", GALLERY_SETTING),
    plain("gs_GalleryControlSetting", GALLERY_CONTROL_SETTING),
    plain("gs_MimeType", MIME_TYPE),
    plain("gs_MimeTypeGallery", MIME_TYPE_GALLERY),
    plain("gs_Role", ROLE),
    plain("gs_Role_Album", ROLE_ALBUM),
    plain("gs_UserGalleryProfile", USER_GALLERY_PROFILE),
    TableMap {
        legacy: "gs_BrowserTemplate",
        columns: MEDIA_TEMPLATE,
        renames: &[("MediaTemplateId", "BrowserTemplateId")],
        fallbacks: &[("BrowserId", Fallback::Text("default"))],
        zero_is_null: &[],
    },
    plain("gs_MediaQueue", MEDIA_QUEUE),
    TableMap {
        legacy: "gs_AppError",
        columns: EVENT,
        renames: &[
            ("EventId", "AppErrorId"),
            ("TimeStampUtc", "TimeStamp"),
            ("ExType", "ExceptionType"),
        ],
        fallbacks: &[("EventType", Fallback::Text("Error"))],
        zero_is_null: &[],
    },
    plain("gs_Synchronize", SYNCHRONIZE),
];

/// Rewrites a 2.6.0 archive into the 3.0.0 layout.
///
/// All-or-nothing: any value that cannot be carried over fails the whole
/// transform. Archives at any other version come back unchanged, which is
/// what makes a retried restore safe.
pub fn reshape_legacy(source: &Archive) -> Result<Archive, ArchiveError> {
    let version = archive::detect_version(source)?;
    if version != SchemaVersion::OLDEST_RESTORABLE {
        return Ok(source.clone());
    }

    let mut out: HashMap<&'static str, Table> = HashMap::new();

    for map in CARRIED {
        let target = catalog::baseline_name(map.legacy);
        out.insert(target, carry(source.table(map.legacy), map, target)?);
    }

    let gallery = reshape_galleries(source)?;
    let album = carry(source.table(ALBUM_MAP.legacy), &ALBUM_MAP, "Album")?;
    let media = carry(source.table(MEDIA_OBJECT_MAP.legacy), &MEDIA_OBJECT_MAP, "MediaObject")?;

    let (facts, fan_out) = reshape_metadata(source, &gallery, &album, &media)?;
    let mut metadata = metadata_table();
    for fact in facts {
        metadata.push_row(fact.into_row())?;
    }
    let (tag, metadata_tag) = fan_out.into_tables()?;

    info!(
        target: "galleryvault",
        event = "reshape_legacy",
        galleries = gallery.len(),
        albums = album.len(),
        media_objects = media.len(),
        metadata = metadata.len(),
        tags = tag.len(),
        metadata_tags = metadata_tag.len()
    );

    out.insert("Gallery", gallery);
    out.insert("Album", album);
    out.insert("MediaObject", media);
    out.insert("Metadata", metadata);
    out.insert("Tag", tag);
    out.insert("MetadataTag", metadata_tag);

    let mut result = Archive::new();
    for name in catalog::tables_for(SchemaVersion::BASELINE, TableKind::Gallery) {
        if let Some(table) = out.remove(name) {
            result.put_table(table);
        }
    }
    for name in catalog::tables_for(SchemaVersion::OLDEST_RESTORABLE, TableKind::Membership) {
        if let Some(table) = source.table(name) {
            result.put_table(table.clone());
        }
    }
    archive::set_version(&mut result, SchemaVersion::BASELINE)?;
    Ok(result)
}

fn reshape_galleries(source: &Archive) -> Result<Table, ArchiveError> {
    let carried = carry(source.table(GALLERY_MAP.legacy), &GALLERY_MAP, "Gallery")?;
    let mut gallery = Table::new("Gallery", carried.columns().to_vec());
    let mut seen = HashSet::new();
    for row in carried.rows() {
        let id = carried.get(row, "GalleryId").as_i64().unwrap_or_default();
        if !seen.insert(id) {
            continue;
        }
        let mut row = row.clone();
        if id == TEMPLATE_GALLERY_ID {
            if let Some(idx) = carried.column_index("IsTemplate") {
                row[idx] = Value::Boolean(true);
            }
        }
        gallery.push_row(row)?;
    }
    if !seen.contains(&TEMPLATE_GALLERY_ID) {
        gallery.push_row(vec![
            Value::Integer(TEMPLATE_GALLERY_ID),
            Value::text("Template Gallery"),
            Value::Boolean(true),
            Value::Timestamp(DateTime::<Utc>::default()),
        ])?;
    }
    Ok(gallery)
}

/// Builds the `Metadata` facts and the tag fan-out.
fn reshape_metadata(
    source: &Archive,
    gallery: &Table,
    album: &Table,
    media: &Table,
) -> Result<(Vec<MetadataFact>, TagFanOut), ArchiveError> {
    let legacy = source.table("gs_MediaObjectMetadata");
    let mut facts = Vec::new();

    if let Some(legacy) = legacy {
        let raw: Vec<(i64, Option<i64>, i64, String)> = legacy
            .rows()
            .iter()
            .enumerate()
            .map(|(idx, row)| -> Result<(i64, Option<i64>, i64, String), ArchiveError> {
                let id = int_cell(legacy, row, "MediaObjectMetadataId", idx)?;
                let media_id = coerce(legacy.get(row, "FKMediaObjectId"), I)
                    .map_err(|reason| cell_error(legacy, "FKMediaObjectId", idx, &reason))?
                    .as_i64();
                let code = int_cell(legacy, row, "MetadataNameIdentifier", idx)?;
                let value = legacy
                    .get(row, "Value")
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Ok((id, media_id, code, value))
            })
            .collect::<Result<_, ArchiveError>>()?;

        let drifted = uses_drifted_codes(raw.iter().map(|(_, _, code, value)| (*code, value.as_str())));
        if drifted {
            info!(target: "galleryvault", event = "reshape_metadata_code_remap", rows = raw.len());
        }

        for (id, media_id, code, value) in raw {
            let meta_name = if drifted { remap_drifted_code(code) } else { code };
            let value = if is_list_valued(meta_name) {
                let items = normalize_items(&value);
                if items.is_empty() {
                    continue;
                }
                items.join(TAG_SEPARATOR)
            } else {
                value
            };
            facts.push(MetadataFact {
                id,
                meta_name,
                media_object_id: media_id,
                album_id: None,
                raw_value: None,
                value,
            });
        }
    }

    let mut ids = FactIds::after(facts.iter().map(|f| f.id).max());
    let existing = media_codes(&facts);

    if let Some(legacy_media) = source.table(MEDIA_OBJECT_MAP.legacy) {
        for row in legacy_media.rows() {
            let Some(media_id) = legacy_media.get(row, "MediaObjectId").as_i64() else {
                continue;
            };
            if existing.contains(&(media_id, META_TITLE)) {
                continue;
            }
            facts.extend(text_fact(
                &mut ids,
                META_TITLE,
                Some(media_id),
                None,
                legacy_media.get(row, "Title"),
            ));
        }
    }

    if let Some(legacy_album) = source.table(ALBUM_MAP.legacy) {
        for row in legacy_album.rows() {
            let Some(album_id) = legacy_album.get(row, "AlbumId").as_i64() else {
                continue;
            };
            facts.extend(text_fact(
                &mut ids,
                META_TITLE,
                None,
                Some(album_id),
                legacy_album.get(row, "Title"),
            ));
            facts.extend(text_fact(
                &mut ids,
                META_CAPTION,
                None,
                Some(album_id),
                legacy_album.get(row, "Summary"),
            ));
        }
    }

    let resolver = GalleryResolver::new(gallery, album, media);
    let mut fan_out = TagFanOut::new();
    for fact in facts.iter().filter(|f| is_list_valued(f.meta_name)) {
        let Some(media_id) = fact.media_object_id else {
            continue;
        };
        let gallery_id = resolver.resolve(media_id).ok_or_else(|| {
            ArchiveError::Malformed(format!(
                "cannot resolve gallery for media object {media_id} (metadata {})",
                fact.id
            ))
        })?;
        let items: Vec<String> = fact.value.split(TAG_SEPARATOR).map(str::to_string).collect();
        fan_out.add(fact.id, gallery_id, &items);
    }

    Ok((facts, fan_out))
}

/// Finds the owning gallery of a media object.
struct GalleryResolver {
    single: Option<i64>,
    album_gallery: BTreeMap<i64, i64>,
    media_album: BTreeMap<i64, i64>,
}

impl GalleryResolver {
    fn new(gallery: &Table, album: &Table, media: &Table) -> Self {
        let user_galleries: Vec<i64> = gallery
            .rows()
            .iter()
            .filter_map(|row| gallery.get(row, "GalleryId").as_i64())
            .filter(|id| *id != TEMPLATE_GALLERY_ID)
            .collect();
        // one real gallery: everything belongs to it
        let single = match user_galleries.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        let pairs = |table: &Table, key: &str, value: &str| -> BTreeMap<i64, i64> {
            table
                .rows()
                .iter()
                .filter_map(|row| Some((table.get(row, key).as_i64()?, table.get(row, value).as_i64()?)))
                .collect()
        };
        Self {
            single,
            album_gallery: pairs(album, "AlbumId", "FKGalleryId"),
            media_album: pairs(media, "MediaObjectId", "FKAlbumId"),
        }
    }

    fn resolve(&self, media_id: i64) -> Option<i64> {
        self.single.or_else(|| {
            self.media_album
                .get(&media_id)
                .and_then(|album| self.album_gallery.get(album))
                .copied()
        })
    }
}

/// Copies `source` into a fresh baseline table following `map`. A missing
/// source yields an empty table with the baseline columns.
fn carry(source: Option<&Table>, map: &TableMap, target: &str) -> Result<Table, ArchiveError> {
    let columns = map
        .columns
        .iter()
        .map(|(name, kind, nullable)| Column::new(*name, *kind, *nullable))
        .collect();
    let mut table = Table::new(target, columns);
    let Some(source) = source else {
        return Ok(table);
    };

    for (idx, row) in source.rows().iter().enumerate() {
        let mut out = Vec::with_capacity(map.columns.len());
        for (name, kind, nullable) in map.columns {
            let legacy_name = map
                .renames
                .iter()
                .find(|(baseline, _)| baseline == name)
                .map(|(_, legacy)| *legacy)
                .unwrap_or(*name);
            let mut value = coerce(source.get(row, legacy_name), *kind)
                .map_err(|reason| cell_error(source, legacy_name, idx, &reason))?;
            if is_gallery_column(name) {
                value = remap_gallery_id(value);
            }
            if map.zero_is_null.contains(name) && value.as_i64() == Some(0) {
                value = Value::Null;
            }
            if value.is_null() && !nullable {
                value = fallback(map, name, *kind);
            }
            out.push(value);
        }
        table.push_row(out)?;
    }
    Ok(table)
}

fn is_gallery_column(name: &str) -> bool {
    name == "GalleryId" || name == "FKGalleryId"
}

/// Maps the legacy template-gallery sentinel onto `TEMPLATE_GALLERY_ID`.
pub fn remap_gallery_id(value: Value) -> Value {
    match value {
        Value::Integer(LEGACY_TEMPLATE_GALLERY_ID) => Value::Integer(TEMPLATE_GALLERY_ID),
        other => other,
    }
}

fn fallback(map: &TableMap, column: &str, kind: ColumnKind) -> Value {
    if let Some((_, fallback)) = map.fallbacks.iter().find(|(name, _)| *name == column) {
        return match fallback {
            Fallback::Text(text) => Value::text(*text),
            Fallback::Bool(v) => Value::Boolean(*v),
        };
    }
    match kind {
        ColumnKind::String => Value::text(""),
        ColumnKind::Integer => Value::Integer(0),
        ColumnKind::Boolean => Value::Boolean(false),
        ColumnKind::Timestamp => Value::Timestamp(DateTime::<Utc>::default()),
        ColumnKind::Fraction => Value::Fraction {
            numerator: 0,
            denominator: 1,
        },
        ColumnKind::Binary => Value::Binary(Vec::new()),
    }
}

/// Converts a legacy cell into `kind`, accepting the loose encodings older
/// exports used (0/1 booleans, numeric strings, `n/d` fractions).
fn coerce(value: &Value, kind: ColumnKind) -> Result<Value, String> {
    if value.is_null() || value.kind() == Some(kind) {
        return Ok(value.clone());
    }
    let converted = match (value, kind) {
        (Value::Integer(v), ColumnKind::Boolean) => Some(Value::Boolean(*v != 0)),
        (Value::Boolean(v), ColumnKind::Integer) => Some(Value::Integer(i64::from(*v))),
        (Value::Integer(v), ColumnKind::String) => Some(Value::text(v.to_string())),
        (Value::Boolean(v), ColumnKind::String) => Some(Value::text(v.to_string())),
        (Value::String(s), ColumnKind::Integer) => s.trim().parse().ok().map(Value::Integer),
        (Value::String(s), ColumnKind::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Boolean(true)),
            "false" | "0" => Some(Value::Boolean(false)),
            _ => None,
        },
        (Value::String(s), ColumnKind::Timestamp) => parse_timestamp(s.trim()).ok().map(Value::Timestamp),
        (Value::String(s), ColumnKind::Fraction) => parse_fraction(s).map(|(numerator, denominator)| {
            Value::Fraction {
                numerator,
                denominator,
            }
        }),
        _ => None,
    };
    converted.ok_or_else(|| format!("cannot convert {value:?} to {kind}"))
}

fn int_cell(table: &Table, row: &Row, column: &str, idx: usize) -> Result<i64, ArchiveError> {
    coerce(table.get(row, column), I)
        .map_err(|reason| cell_error(table, column, idx, &reason))?
        .as_i64()
        .ok_or_else(|| cell_error(table, column, idx, "missing value"))
}

fn cell_error(table: &Table, column: &str, row: usize, reason: &str) -> ArchiveError {
    ArchiveError::Malformed(format!("{}.{column} row {row}: {reason}", table.name))
}
