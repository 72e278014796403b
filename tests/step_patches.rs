use anyhow::{Context, Result};
use galleryvault_lib::ledger;
use galleryvault_lib::migrations::steps::{standard_steps, WATERMARK_DIR};
use galleryvault_lib::migrations::{self, MigrationChain, StepContext, UpgradeSummary};
use galleryvault_lib::version::SchemaVersion;
use sqlx::SqlitePool;

mod util;

use util::{gallery_setting, memory_store};

const OLD_HEADER: &str = "<form><input placeholder=\"Seach the gallery\" /></form>\
                          <a href=\"{{:App.HelpUrl}}\" target=\"_blank\">Help</a>";

/// Runs the single standard step named `name` from its own `from` version.
async fn run_step(pool: &SqlitePool, name: &str, ctx: &StepContext) -> Result<UpgradeSummary> {
    let step = standard_steps()
        .into_iter()
        .find(|step| step.name == name)
        .with_context(|| format!("no step named {name}"))?;
    let mut chain = MigrationChain::new();
    chain.register(step)?;

    let mut conn = pool.acquire().await?;
    ledger::set_version(&mut conn, step.from).await?;
    let summary = migrations::upgrade_store(&mut conn, &chain, ctx).await?;
    assert_eq!(summary.end, step.to, "{name}");
    Ok(summary)
}

async fn add_ui_template(pool: &SqlitePool, id: i64, kind: &str, html: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO UiTemplate (UiTemplateId, TemplateType, FKGalleryId, Name, Description, \
         HtmlTemplate, ScriptTemplate) VALUES (?1, ?2, -1, 'Custom', NULL, ?3, '')",
    )
    .bind(id)
    .bind(kind)
    .bind(html)
    .execute(pool)
    .await?;
    Ok(())
}

async fn ui_html(pool: &SqlitePool, id: i64) -> Result<String> {
    Ok(
        sqlx::query_scalar("SELECT HtmlTemplate FROM UiTemplate WHERE UiTemplateId = ?1")
            .bind(id)
            .fetch_one(pool)
            .await?,
    )
}

#[tokio::test]
async fn ui_template_patches_apply_exactly_once() -> Result<()> {
    let pool = memory_store().await;
    let cases = [
        (
            "album_title_class",
            "Album",
            "<div><h2>{{:Album.Title}}</h2></div>",
            "<h2 class=\"gsp_albumTitle\">{{:Album.Title}}</h2>",
        ),
        (
            "search_placeholder_typo",
            "Header",
            OLD_HEADER,
            "Search the gallery",
        ),
        (
            "left_pane_tree_attr",
            "LeftPane",
            "<div id=\"{{:Settings.ClientId}}_lptv\"></div>",
            "<div id=\"{{:Settings.ClientId}}_lptv\" data-gsp-tree=\"true\">",
        ),
        (
            "caption_wrapper",
            "MediaObject",
            "<p>{{:MediaItem.Title}}</p>",
            "<div class=\"gsp_caption\"><p>{{:MediaItem.Title}}</p></div>",
        ),
        (
            "noopener_links",
            "Header",
            OLD_HEADER,
            "target=\"_blank\" rel=\"noopener\">",
        ),
    ];

    for (offset, (step, kind, old, patched)) in cases.iter().enumerate() {
        let id = 900 + offset as i64;
        add_ui_template(&pool, id, kind, old).await?;

        run_step(&pool, step, &StepContext::default()).await?;
        let once = ui_html(&pool, id).await?;
        assert_eq!(once.matches(patched).count(), 1, "{step}: {once}");

        run_step(&pool, step, &StepContext::default()).await?;
        let twice = ui_html(&pool, id).await?;
        assert_eq!(twice, once, "{step} changed already-patched text");
    }

    let header = ui_html(&pool, 901).await?;
    assert!(!header.contains("Seach"), "{header}");
    Ok(())
}

#[tokio::test]
async fn video_preload_patches_only_mp4_templates() -> Result<()> {
    let pool = memory_store().await;
    let old = "<video src=\"{MediaObjectUrl}\" controls></video>";
    for (id, mime) in [(900, "video/mp4"), (901, "video/webm")] {
        sqlx::query(
            "INSERT INTO MediaTemplate (MediaTemplateId, MimeType, BrowserId, HtmlTemplate, \
             ScriptTemplate) VALUES (?1, ?2, 'default', ?3, '')",
        )
        .bind(id)
        .bind(mime)
        .bind(old)
        .execute(&pool)
        .await?;
    }

    run_step(&pool, "video_preload", &StepContext::default()).await?;
    run_step(&pool, "video_preload", &StepContext::default()).await?;

    let html = |id: i64| {
        sqlx::query_scalar::<_, String>(
            "SELECT HtmlTemplate FROM MediaTemplate WHERE MediaTemplateId = ?1",
        )
        .bind(id)
        .fetch_one(&pool)
    };
    let mp4 = html(900).await?;
    assert_eq!(mp4.matches("preload=\"metadata\"").count(), 1, "{mp4}");
    assert_eq!(html(901).await?, old);
    Ok(())
}

#[tokio::test]
async fn watermarks_are_copied_and_missing_files_left_alone() -> Result<()> {
    let pool = memory_store().await;
    let assets = tempfile::tempdir()?;
    std::fs::create_dir_all(assets.path().join("images"))?;
    std::fs::write(assets.path().join("images").join("logo.png"), b"png")?;

    for (gallery, path) in [(2, "images\\logo.png"), (3, "images/gone.png")] {
        sqlx::query(
            "INSERT INTO Gallery (GalleryId, Description, IsTemplate, DateAdded) \
             VALUES (?1, 'Gallery', 0, '2019-03-01T00:00:00Z')",
        )
        .bind(gallery)
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO GallerySetting (FKGalleryId, IsTemplate, SettingName, SettingValue) \
             VALUES (?1, 0, 'WatermarkImagePath', ?2)",
        )
        .bind(gallery)
        .bind(path)
        .execute(&pool)
        .await?;
    }

    let ctx = StepContext {
        asset_root: Some(assets.path().to_path_buf()),
    };
    let summary = run_step(&pool, "relocate_watermarks", &ctx).await?;
    assert_eq!(summary.end, SchemaVersion::V4_0_0);

    let moved = format!("{WATERMARK_DIR}/logo.png");
    assert_eq!(
        gallery_setting(&pool, 2, "WatermarkImagePath").await.as_deref(),
        Some(moved.as_str())
    );
    assert!(assets.path().join(&moved).is_file());
    assert!(assets.path().join("images").join("logo.png").is_file());
    assert_eq!(
        gallery_setting(&pool, 3, "WatermarkImagePath").await.as_deref(),
        Some("images/gone.png")
    );

    let mut conn = pool.acquire().await?;
    assert_eq!(ledger::get_version(&mut conn).await?, SchemaVersion::V4_0_0);
    Ok(())
}
