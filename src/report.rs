use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::transfer::{ImportOptions, RestoreReport};
use crate::validate::ValidationResult;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreReportFile<'a> {
    generated_at: String,
    archive_path: String,
    options: &'a ImportOptions,
    validation: &'a ValidationResult,
    restore: &'a RestoreReport,
}

/// Writes `restore-YYYYmmdd-HHMMSS.json` into `reports_dir` and returns its path.
pub fn write_restore_report(
    reports_dir: &Path,
    archive_path: &Path,
    options: &ImportOptions,
    validation: &ValidationResult,
    restore: &RestoreReport,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let path = reports_dir.join(now.format("restore-%Y%m%d-%H%M%S.json").to_string());
    let payload = RestoreReportFile {
        generated_at: now.to_rfc3339(),
        archive_path: archive_path.display().to_string(),
        options,
        validation,
        restore,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize restore report")?;
    fs::write(&path, json).with_context(|| format!("write restore report {}", path.display()))?;
    Ok(path)
}
