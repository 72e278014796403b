//! The standard upgrade steps, one per version the data format went through.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};

use super::patch::{apply_store_patch, TemplatePatch};
use super::{MigrationError, MigrationStep, StepAction, StepContext};
use crate::archive::Archive;
use crate::catalog::TEMPLATE_GALLERY_ID;
use crate::ledger;
use crate::reshape::{self, metadata::META_RATING};
use crate::version::SchemaVersion::{self, *};

pub const WATERMARK_DIR: &str = "App_Data/watermark_images";

pub fn standard_steps() -> Vec<MigrationStep> {
    vec![
        archive_step(V2_6_0, "reshape_legacy_layout", reshape_legacy_layout),
        store_step(V3_0_0, "rename_max_event_items", rename_max_event_items),
        store_step(V3_0_1, "album_title_class", album_title_class),
        store_step(V3_0_2, "add_open_video_types", add_open_video_types),
        store_step(V3_0_3, "metadata_display_json", metadata_display_json),
        store_step(V3_1_0, "slideshow_loop_setting", slideshow_loop_setting),
        store_step(V3_2_0, "search_placeholder_typo", search_placeholder_typo),
        store_step(V3_2_1, "relocate_watermarks", relocate_watermarks),
        store_step(V4_0_0, "drop_wmf_type", drop_wmf_type),
        store_step(V4_0_1, "left_pane_tree_attr", left_pane_tree_attr),
        store_step(V4_1_0, "rename_page_size", rename_page_size),
        store_step(V4_2_0, "video_preload", video_preload),
        store_step(V4_2_1, "transition_names", transition_names),
        store_step(V4_3_0, "caption_wrapper", caption_wrapper),
        store_step(V4_4_0, "m4a_mime_value", m4a_mime_value),
        store_step(V4_4_1, "clamp_ratings", clamp_ratings),
        store_step(V4_4_2, "noopener_links", noopener_links),
        store_step(V4_4_3, "license_settings", license_settings),
    ]
}

fn archive_step(
    from: SchemaVersion,
    name: &'static str,
    run: super::ArchiveStepFn,
) -> MigrationStep {
    MigrationStep {
        from,
        to: from.next().unwrap_or(from),
        name,
        action: StepAction::Archive(run),
    }
}

fn store_step(from: SchemaVersion, name: &'static str, run: super::StoreStepFn) -> MigrationStep {
    MigrationStep {
        from,
        to: from.next().unwrap_or(from),
        name,
        action: StepAction::Store(run),
    }
}

fn reshape_legacy_layout(archive: &mut Archive) -> Result<(), MigrationError> {
    *archive = reshape::reshape_legacy(archive)?;
    Ok(())
}

// ---- shared helpers -------------------------------------------------------

/// Renames a gallery setting unless the gallery already has the new name,
/// in which case the stale row is dropped.
async fn rename_gallery_setting(
    conn: &mut SqliteConnection,
    old: &str,
    new: &str,
) -> Result<(), MigrationError> {
    let renamed = sqlx::query(
        "UPDATE GallerySetting SET SettingName = ?2 \
         WHERE SettingName = ?1 AND NOT EXISTS (\
           SELECT 1 FROM GallerySetting g \
           WHERE g.FKGalleryId = GallerySetting.FKGalleryId AND g.SettingName = ?2)",
    )
    .bind(old)
    .bind(new)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    let dropped = sqlx::query("DELETE FROM GallerySetting WHERE SettingName = ?1")
        .bind(old)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    info!(target: "galleryvault", event = "setting_renamed", from = old, to = new, rows = renamed, dropped);
    Ok(())
}

/// Inserts the MIME type when absent and enables it for every gallery that
/// does not list it yet.
async fn ensure_mime_type(
    conn: &mut SqliteConnection,
    extension: &str,
    mime: &str,
    browser_mime: &str,
) -> Result<(), MigrationError> {
    sqlx::query(
        "INSERT INTO MimeType (FileExtension, MimeTypeValue, BrowserMimeTypeValue) \
         SELECT ?1, ?2, ?3 WHERE NOT EXISTS (SELECT 1 FROM MimeType WHERE FileExtension = ?1)",
    )
    .bind(extension)
    .bind(mime)
    .bind(browser_mime)
    .execute(&mut *conn)
    .await?;
    let enabled = sqlx::query(
        "INSERT INTO MimeTypeGallery (FKGalleryId, FKMimeTypeId, IsEnabled) \
         SELECT g.GalleryId, m.MimeTypeId, 1 FROM Gallery g, MimeType m \
         WHERE m.FileExtension = ?1 AND NOT EXISTS (\
           SELECT 1 FROM MimeTypeGallery x \
           WHERE x.FKGalleryId = g.GalleryId AND x.FKMimeTypeId = m.MimeTypeId)",
    )
    .bind(extension)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    info!(target: "galleryvault", event = "mime_type_ensured", extension, galleries = enabled);
    Ok(())
}

async fn patch_templates(
    conn: &mut SqliteConnection,
    patch: TemplatePatch,
) -> Result<(), MigrationError> {
    apply_store_patch(conn, &patch).await?;
    Ok(())
}

const fn ui_patch(
    template_type: &'static str,
    find: &'static str,
    replace: &'static str,
) -> TemplatePatch {
    TemplatePatch {
        table: "UiTemplate",
        id_column: "UiTemplateId",
        filter: Some(("TemplateType", template_type)),
        column: "HtmlTemplate",
        find,
        replace,
    }
}

// ---- 3.x ------------------------------------------------------------------

fn rename_max_event_items<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        rename_gallery_setting(conn, "MaxNumberErrorItems", "MaxNumberEventItems").await?;
        ledger::set_version(conn, V3_0_1).await?;
        Ok(())
    })
}

fn album_title_class<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            ui_patch(
                "Album",
                "<h2>{{:Album.Title}}</h2>",
                "<h2 class=\"gsp_albumTitle\">{{:Album.Title}}</h2>",
            ),
        )
        .await?;
        ledger::set_version(conn, V3_0_2).await?;
        Ok(())
    })
}

fn add_open_video_types<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        ensure_mime_type(conn, ".webm", "video/webm", "video/webm").await?;
        ensure_mime_type(conn, ".ogv", "video/ogg", "video/ogg").await?;
        ledger::set_version(conn, V3_0_3).await?;
        Ok(())
    })
}

/// `"29|41:0"` becomes `[{"metaName":29,"sequence":0,"isVisible":true}, ...]`.
/// A `:0` suffix hides the item. Returns `None` for values that are already
/// JSON or contain nothing usable.
pub fn metadata_display_to_json(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('[') {
        return None;
    }
    let mut items = Vec::new();
    for piece in raw.split('|') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (code, visible) = match piece.split_once(':') {
            Some((code, flag)) => (code.trim(), flag.trim() != "0"),
            None => (piece, true),
        };
        let Ok(code) = code.parse::<i64>() else {
            continue;
        };
        let sequence = items.len();
        items.push(json!({
            "metaName": code,
            "sequence": sequence,
            "isVisible": visible,
        }));
    }
    if items.is_empty() {
        return None;
    }
    Some(serde_json::Value::Array(items).to_string())
}

fn metadata_display_json<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        let rows = sqlx::query(
            "SELECT GallerySettingId, SettingValue FROM GallerySetting \
             WHERE SettingName = 'MetadataDisplaySettings'",
        )
        .fetch_all(&mut *conn)
        .await?;
        for row in rows {
            let id: i64 = row.try_get("GallerySettingId")?;
            let value: String = row.try_get("SettingValue")?;
            if let Some(encoded) = metadata_display_to_json(&value) {
                sqlx::query("UPDATE GallerySetting SET SettingValue = ?1 WHERE GallerySettingId = ?2")
                    .bind(encoded)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        ledger::set_version(conn, V3_1_0).await?;
        Ok(())
    })
}

fn slideshow_loop_setting<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        sqlx::query(
            "INSERT INTO GallerySetting (FKGalleryId, IsTemplate, SettingName, SettingValue) \
             SELECT ?1, 1, 'SlideShowLoop', 'false' \
             WHERE EXISTS (SELECT 1 FROM Gallery WHERE GalleryId = ?1) \
               AND NOT EXISTS (SELECT 1 FROM GallerySetting \
                               WHERE FKGalleryId = ?1 AND SettingName = 'SlideShowLoop')",
        )
        .bind(TEMPLATE_GALLERY_ID)
        .execute(&mut *conn)
        .await?;
        ledger::set_version(conn, V3_2_0).await?;
        Ok(())
    })
}

fn search_placeholder_typo<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            ui_patch("Header", "Seach the gallery", "Search the gallery"),
        )
        .await?;
        ledger::set_version(conn, V3_2_1).await?;
        Ok(())
    })
}

/// Where a watermark referenced by `value` should live after relocation,
/// relative to the asset root. `None` when it is already there or blank.
pub fn relocated_watermark(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.replace('\\', "/").starts_with(WATERMARK_DIR) {
        return None;
    }
    let file_name = Path::new(&value.replace('\\', "/"))
        .file_name()?
        .to_string_lossy()
        .into_owned();
    Some(format!("{WATERMARK_DIR}/{file_name}"))
}

fn resolve_asset(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value.replace('\\', "/"));
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn relocate_watermarks<'c>(
    conn: &'c mut SqliteConnection,
    ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        if let Some(root) = ctx.asset_root.as_deref() {
            let rows = sqlx::query(
                "SELECT GallerySettingId, SettingValue FROM GallerySetting \
                 WHERE SettingName = 'WatermarkImagePath'",
            )
            .fetch_all(&mut *conn)
            .await?;
            let target_dir = root.join(WATERMARK_DIR);
            for row in rows {
                let id: i64 = row.try_get("GallerySettingId")?;
                let value: String = row.try_get("SettingValue")?;
                let Some(relocated) = relocated_watermark(&value) else {
                    continue;
                };
                tokio::fs::create_dir_all(&target_dir)
                    .await
                    .map_err(|source| MigrationError::AssetDir {
                        path: target_dir.display().to_string(),
                        source,
                    })?;
                // Copied, not moved: the transaction may still roll back.
                let source = resolve_asset(root, &value);
                let destination = root.join(&relocated);
                if let Err(err) = tokio::fs::copy(&source, &destination).await {
                    warn!(target: "galleryvault", event = "watermark_copy_skipped", source = %source.display(), error = %err);
                    continue;
                }
                sqlx::query("UPDATE GallerySetting SET SettingValue = ?1 WHERE GallerySettingId = ?2")
                    .bind(&relocated)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                info!(target: "galleryvault", event = "watermark_relocated", from = %value, to = %relocated);
            }
        } else {
            warn!(target: "galleryvault", event = "watermark_relocation_skipped", reason = "no asset root configured");
        }
        ledger::set_version(conn, V4_0_0).await?;
        Ok(())
    })
}

// ---- 4.x ------------------------------------------------------------------

fn drop_wmf_type<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        sqlx::query(
            "DELETE FROM MimeTypeGallery WHERE FKMimeTypeId IN \
             (SELECT MimeTypeId FROM MimeType WHERE FileExtension = '.wmf')",
        )
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM MimeType WHERE FileExtension = '.wmf'")
            .execute(&mut *conn)
            .await?;
        ledger::set_version(conn, V4_0_1).await?;
        Ok(())
    })
}

fn left_pane_tree_attr<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            ui_patch(
                "LeftPane",
                "<div id=\"{{:Settings.ClientId}}_lptv\">",
                "<div id=\"{{:Settings.ClientId}}_lptv\" data-gsp-tree=\"true\">",
            ),
        )
        .await?;
        ledger::set_version(conn, V4_1_0).await?;
        Ok(())
    })
}

fn rename_page_size<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        rename_gallery_setting(conn, "PageSize", "DefaultPageSize").await?;
        ledger::set_version(conn, V4_2_0).await?;
        Ok(())
    })
}

fn video_preload<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            TemplatePatch {
                table: "MediaTemplate",
                id_column: "MediaTemplateId",
                filter: Some(("MimeType", "video/mp4")),
                column: "HtmlTemplate",
                find: "<video src=\"{MediaObjectUrl}\" controls>",
                replace: "<video src=\"{MediaObjectUrl}\" controls preload=\"metadata\">",
            },
        )
        .await?;
        ledger::set_version(conn, V4_2_1).await?;
        Ok(())
    })
}

pub fn transition_name(code: &str) -> Option<&'static str> {
    match code.trim() {
        "0" => Some("None"),
        "1" => Some("Fade"),
        "2" => Some("Slide"),
        _ => None,
    }
}

fn transition_names<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        let rows = sqlx::query(
            "SELECT GallerySettingId, SettingValue FROM GallerySetting \
             WHERE SettingName = 'MediaObjectTransitionType'",
        )
        .fetch_all(&mut *conn)
        .await?;
        for row in rows {
            let id: i64 = row.try_get("GallerySettingId")?;
            let value: String = row.try_get("SettingValue")?;
            if let Some(name) = transition_name(&value) {
                sqlx::query("UPDATE GallerySetting SET SettingValue = ?1 WHERE GallerySettingId = ?2")
                    .bind(name)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        ledger::set_version(conn, V4_3_0).await?;
        Ok(())
    })
}

fn caption_wrapper<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            ui_patch(
                "MediaObject",
                "<p>{{:MediaItem.Title}}</p>",
                "<div class=\"gsp_caption\"><p>{{:MediaItem.Title}}</p></div>",
            ),
        )
        .await?;
        ledger::set_version(conn, V4_4_0).await?;
        Ok(())
    })
}

fn m4a_mime_value<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        sqlx::query(
            "UPDATE MimeType SET MimeTypeValue = 'audio/mp4', BrowserMimeTypeValue = 'audio/mp4' \
             WHERE FileExtension = '.m4a' AND MimeTypeValue = 'audio/m4a'",
        )
        .execute(&mut *conn)
        .await?;
        ledger::set_version(conn, V4_4_1).await?;
        Ok(())
    })
}

/// Ratings live as text; anything outside `0..=5` is pulled to the nearest
/// bound and unparsable values become `"0"`.
pub fn clamp_rating(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(rating) if rating.is_finite() => (rating.round().clamp(0.0, 5.0) as i64).to_string(),
        _ => "0".to_string(),
    }
}

fn clamp_ratings<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        let rows = sqlx::query("SELECT MetadataId, Value FROM Metadata WHERE MetaName = ?1")
            .bind(META_RATING)
            .fetch_all(&mut *conn)
            .await?;
        let mut clamped = 0u64;
        for row in rows {
            let id: i64 = row.try_get("MetadataId")?;
            let value: String = row.try_get("Value")?;
            let fixed = clamp_rating(&value);
            if fixed != value {
                sqlx::query("UPDATE Metadata SET Value = ?1 WHERE MetadataId = ?2")
                    .bind(&fixed)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                clamped += 1;
            }
        }
        info!(target: "galleryvault", event = "ratings_clamped", rows = clamped);
        ledger::set_version(conn, V4_4_2).await?;
        Ok(())
    })
}

fn noopener_links<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        patch_templates(
            conn,
            ui_patch(
                "Header",
                "target=\"_blank\">",
                "target=\"_blank\" rel=\"noopener\">",
            ),
        )
        .await?;
        ledger::set_version(conn, V4_4_3).await?;
        Ok(())
    })
}

fn license_settings<'c>(
    conn: &'c mut SqliteConnection,
    _ctx: &'c StepContext,
) -> BoxFuture<'c, Result<(), MigrationError>> {
    Box::pin(async move {
        sqlx::query(
            "UPDATE AppSetting SET SettingName = 'LicenseKey' WHERE SettingName = 'ProductKey' \
             AND NOT EXISTS (SELECT 1 FROM AppSetting WHERE SettingName = 'LicenseKey')",
        )
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM AppSetting WHERE SettingName = 'ProductKey'")
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            "INSERT INTO AppSetting (SettingName, SettingValue) SELECT 'LicenseEmail', '' \
             WHERE NOT EXISTS (SELECT 1 FROM AppSetting WHERE SettingName = 'LicenseEmail')",
        )
        .execute(&mut *conn)
        .await?;
        ledger::set_version(conn, V4_5_0).await?;
        Ok(())
    })
}
