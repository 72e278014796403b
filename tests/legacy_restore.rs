use anyhow::Result;
use galleryvault_lib::catalog::TEMPLATE_GALLERY_ID;
use galleryvault_lib::transfer::{self, ImportOptions};
use galleryvault_lib::validate::validate_archive;
use galleryvault_lib::version::SchemaVersion;

mod util;

use util::{app_setting, config, count, gallery_setting, legacy_archive, memory_store, LEGACY_TEMPLATE};

#[tokio::test]
async fn legacy_archive_lands_at_current_version() -> Result<()> {
    let pool = memory_store().await;
    let report =
        transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    assert_eq!(report.source_version, SchemaVersion::V2_6_0);
    assert_eq!(report.final_version, SchemaVersion::CURRENT);
    assert_eq!(report.steps_applied.first().map(String::as_str), Some("reshape_legacy_layout"));
    assert_eq!(report.steps_applied.len(), 18);
    assert!(!report.compacted, "in-memory stores are never compacted");
    assert_eq!(app_setting(&pool, "DataSchemaVersion").await.as_deref(), Some("4.5.0"));
    Ok(())
}

#[tokio::test]
async fn tag_list_fans_out_into_tags_and_links() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    let mut tags: Vec<String> = sqlx::query_scalar("SELECT TagName FROM Tag ORDER BY TagName")
        .fetch_all(&pool)
        .await?;
    tags.sort();
    assert_eq!(tags, vec!["2013", "New York", "Vacation"]);

    let links: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT FKMetadataId, FKTagName, FKGalleryId FROM MetadataTag ORDER BY FKTagName",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(links.len(), 3);
    assert!(links.iter().all(|(metadata, _, gallery)| *metadata == 100 && *gallery == 1));

    let stored: String = sqlx::query_scalar("SELECT Value FROM Metadata WHERE MetadataId = 100")
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored, "Vacation, New York, 2013");
    Ok(())
}

#[tokio::test]
async fn restoring_the_same_archive_twice_adds_nothing() -> Result<()> {
    let pool = memory_store().await;
    let first =
        transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;
    let tags_before = count(&pool, "Tag").await;
    let metadata_before = count(&pool, "Metadata").await;

    let second =
        transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    assert_eq!(first.tables, second.tables);
    assert_eq!(count(&pool, "Tag").await, tags_before);
    assert_eq!(count(&pool, "MetadataTag").await, 3);
    assert_eq!(count(&pool, "Metadata").await, metadata_before);
    assert_eq!(count(&pool, "Gallery").await, 2);
    Ok(())
}

#[tokio::test]
async fn sentinel_template_gallery_becomes_minus_one() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    let template: (i64, bool) =
        sqlx::query_as("SELECT GalleryId, IsTemplate FROM Gallery WHERE IsTemplate = 1")
            .fetch_one(&pool)
            .await?;
    assert_eq!(template, (TEMPLATE_GALLERY_ID, true));

    let stale: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM Gallery WHERE GalleryId = ?1) \
              + (SELECT COUNT(*) FROM GallerySetting WHERE FKGalleryId = ?1)",
    )
    .bind(LEGACY_TEMPLATE)
    .fetch_one(&pool)
    .await?;
    assert_eq!(stale, 0);
    assert_eq!(
        gallery_setting(&pool, TEMPLATE_GALLERY_ID, "DefaultPageSize").await.as_deref(),
        Some("30")
    );
    Ok(())
}

#[tokio::test]
async fn later_steps_rewrite_legacy_values() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    assert_eq!(gallery_setting(&pool, 1, "PageSize").await, None);
    assert_eq!(gallery_setting(&pool, 1, "DefaultPageSize").await.as_deref(), Some("25"));
    assert_eq!(gallery_setting(&pool, 1, "MaxNumberErrorItems").await, None);
    assert_eq!(
        gallery_setting(&pool, 1, "MaxNumberEventItems").await.as_deref(),
        Some("200")
    );
    assert_eq!(
        gallery_setting(&pool, 1, "MediaObjectTransitionType").await.as_deref(),
        Some("Fade")
    );

    let display = gallery_setting(&pool, 1, "MetadataDisplaySettings")
        .await
        .expect("display setting kept");
    let parsed: serde_json::Value = serde_json::from_str(&display)?;
    assert_eq!(parsed.as_array().map(Vec::len), Some(2));

    let rating: String = sqlx::query_scalar("SELECT Value FROM Metadata WHERE MetadataId = 101")
        .fetch_one(&pool)
        .await?;
    assert_eq!(rating, "5");

    assert_eq!(app_setting(&pool, "ProductKey").await, None);
    assert_eq!(app_setting(&pool, "LicenseKey").await.as_deref(), Some("ABC-123"));
    assert_eq!(app_setting(&pool, "LicenseEmail").await.as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn seeded_templates_survive_a_legacy_import() -> Result<()> {
    let pool = memory_store().await;
    let mime_types = count(&pool, "MimeType").await;
    let ui_templates = count(&pool, "UiTemplate").await;

    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    assert_eq!(count(&pool, "MimeType").await, mime_types);
    assert_eq!(count(&pool, "UiTemplate").await, ui_templates);
    let header: String =
        sqlx::query_scalar("SELECT HtmlTemplate FROM UiTemplate WHERE TemplateType = 'Header'")
            .fetch_one(&pool)
            .await?;
    assert!(header.contains("Search the gallery"));
    assert!(!header.contains("Seach the gallery"));

    let orphaned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM MimeTypeGallery WHERE FKGalleryId NOT IN (SELECT GalleryId FROM Gallery)",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(orphaned, 0);
    Ok(())
}

#[tokio::test]
async fn album_titles_move_into_metadata() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    let title: String = sqlx::query_scalar(
        "SELECT Value FROM Metadata WHERE FKAlbumId = 2 AND MetaName = 29",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(title, "Vacation");
    let media_title: String = sqlx::query_scalar(
        "SELECT Value FROM Metadata WHERE FKMediaObjectId = 10 AND MetaName = 29",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(media_title, "Beach");

    let parent: Option<i64> =
        sqlx::query_scalar("SELECT FKAlbumParentId FROM Album WHERE AlbumId = 1")
            .fetch_one(&pool)
            .await?;
    assert_eq!(parent, None);
    Ok(())
}

#[test]
fn validation_reports_without_changing_the_archive() {
    let archive = legacy_archive();
    let before = archive.clone();
    let result = validate_archive(&archive).unwrap();

    assert_eq!(archive, before);
    assert!(result.is_valid);
    assert_eq!(result.version, SchemaVersion::V2_6_0);
    assert_eq!(result.table_row_counts.get("Album"), Some(&2));
    assert_eq!(result.table_row_counts.get("Metadata"), Some(&2));
    assert!(result.missing_tables.contains(&"aspnet_Users".to_string()));
}
