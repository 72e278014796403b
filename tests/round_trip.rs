use anyhow::Result;
use galleryvault_lib::archive::{self, Value};
use galleryvault_lib::transfer::{self, ExportOptions, ImportOptions};
use galleryvault_lib::version::SchemaVersion;

mod util;

use util::{config, count, legacy_archive, memory_store, row_for};

#[tokio::test]
async fn exported_store_restores_into_an_identical_store() -> Result<()> {
    let source = memory_store().await;
    transfer::restore(&source, legacy_archive(), &ImportOptions::default(), &config()).await?;

    let exported = transfer::export(&source, &ExportOptions::default()).await?;
    let bytes = archive::save(&exported)?;
    let reloaded = archive::load(&bytes)?;
    assert_eq!(reloaded, exported);

    let target = memory_store().await;
    let report = transfer::restore(&target, reloaded, &ImportOptions::default(), &config()).await?;
    assert_eq!(report.source_version, SchemaVersion::CURRENT);
    assert!(report.steps_applied.is_empty());

    let again = transfer::export(&target, &ExportOptions::default()).await?;
    assert_eq!(again, exported);
    Ok(())
}

#[tokio::test]
async fn export_reads_typed_values_back() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;

    let exported = transfer::export(&pool, &ExportOptions::default()).await?;
    let album = exported.table("Album").expect("album exported");
    let vacation = album
        .rows()
        .iter()
        .find(|row| album.get(row, "AlbumId") == &Value::Integer(2))
        .expect("album 2");
    assert_eq!(album.get(vacation, "FKAlbumParentId"), &Value::Integer(1));
    assert_eq!(album.get(vacation, "SortAscending"), &Value::Boolean(true));
    assert!(matches!(album.get(vacation, "DateAdded"), Value::Timestamp(_)));
    assert_eq!(exported.tables()[0].name, "AppSetting");
    Ok(())
}

#[tokio::test]
async fn membership_only_export_leaves_gallery_tables_out() -> Result<()> {
    let pool = memory_store().await;
    let options = ExportOptions {
        include_membership: true,
        include_gallery_data: false,
    };
    let exported = transfer::export(&pool, &options).await?;

    assert!(exported.has_table("AppSetting"));
    assert!(exported.has_table("aspnet_Users"));
    assert!(!exported.has_table("Album"));
    assert_eq!(archive::detect_version(&exported)?, SchemaVersion::CURRENT);
    Ok(())
}

#[tokio::test]
async fn membership_only_restore_keeps_gallery_rows() -> Result<()> {
    let pool = memory_store().await;
    transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;
    let albums = count(&pool, "Album").await;

    let mut members = transfer::export(
        &pool,
        &ExportOptions {
            include_membership: true,
            include_gallery_data: false,
        },
    )
    .await?;
    let applications = members.table("aspnet_Applications").expect("table").clone();
    let mut filled = applications.clone();
    filled.push_row(row_for(
        &applications,
        &[
            ("ApplicationId", Value::text("app-1")),
            ("ApplicationName", Value::text("/")),
        ],
    ))?;
    members.put_table(filled);

    let report = transfer::restore(
        &pool,
        members,
        &ImportOptions {
            include_membership: true,
            include_gallery_data: false,
        },
        &config(),
    )
    .await?;

    assert!(report.steps_applied.is_empty());
    assert_eq!(report.final_version, SchemaVersion::CURRENT);
    assert_eq!(report.tables.get("aspnet_Applications"), Some(&1));
    assert!(!report.tables.contains_key("Album"));
    assert_eq!(count(&pool, "Album").await, albums);
    assert_eq!(count(&pool, "aspnet_Applications").await, 1);
    Ok(())
}

#[tokio::test]
async fn file_store_is_compacted_after_restore() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = galleryvault_lib::store::open_store(&dir.path().join("gallery.sqlite3"), &config())
        .await?;
    let report =
        transfer::restore(&pool, legacy_archive(), &ImportOptions::default(), &config()).await?;
    assert!(report.compacted);
    assert_eq!(count(&pool, "Tag").await, 3);
    Ok(())
}
