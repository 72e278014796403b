use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;

use galleryvault_lib::config::EngineConfig;
use galleryvault_lib::transfer::{ExportOptions, ImportOptions};
use galleryvault_lib::{admin, logging, report, store, AppError, AppResult};

#[derive(Parser)]
#[command(name = "galleryvault", about = "Gallery backup, restore and upgrade tool")]
struct Cli {
    /// Store to operate on (defaults to the per-user data directory)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Clone, Copy)]
struct Scope {
    /// Leave the membership tables out
    #[arg(long)]
    skip_membership: bool,
    /// Leave the gallery tables out
    #[arg(long)]
    skip_gallery: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Inspect an archive without touching any store
    Validate { archive: PathBuf },
    /// Replace store contents with an archive and upgrade to the current version
    Import {
        archive: PathBuf,
        #[command(flatten)]
        scope: Scope,
        /// Write a JSON restore report into this directory
        #[arg(long, value_name = "DIR")]
        report_dir: Option<PathBuf>,
    },
    /// Write the store contents to an archive
    Export {
        archive: PathBuf,
        #[command(flatten)]
        scope: Scope,
    },
    /// Apply pending upgrade steps to the store in place
    Upgrade,
    /// Show the store version, pending steps and row counts
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let rendered =
                serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string());
            eprintln!("{rendered}");
            ExitCode::FAILURE
        }
    }
}

fn default_db_path() -> AppResult<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(base.join("galleryvault").join("gallery.sqlite3"))
}

async fn open(db: Option<PathBuf>, config: &EngineConfig) -> AppResult<SqlitePool> {
    let path = match db {
        Some(path) => path,
        None => default_db_path()?,
    };
    Ok(store::open_store(&path, config).await?)
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = EngineConfig::from_env();
    match cli.cmd {
        Cmd::Validate { archive } => print_json(&admin::validate_file(&archive)?),
        Cmd::Import {
            archive,
            scope,
            report_dir,
        } => {
            let pool = open(cli.db, &config).await?;
            let options = ImportOptions {
                include_membership: !scope.skip_membership,
                include_gallery_data: !scope.skip_gallery,
            };
            let outcome = admin::import_file(&pool, &archive, &options, &config).await?;
            if let Some(dir) = report_dir {
                write_report(&dir, &archive, &options, &outcome)?;
            }
            print_json(&outcome)
        }
        Cmd::Export { archive, scope } => {
            let pool = open(cli.db, &config).await?;
            let options = ExportOptions {
                include_membership: !scope.skip_membership,
                include_gallery_data: !scope.skip_gallery,
            };
            print_json(&admin::export_to_file(&pool, &archive, &options).await?)
        }
        Cmd::Upgrade => {
            let pool = open(cli.db, &config).await?;
            print_json(&admin::upgrade(&pool, &config).await?)
        }
        Cmd::Status => {
            let pool = open(cli.db, &config).await?;
            print_json(&admin::status(&pool).await?)
        }
    }
}

fn write_report(
    dir: &Path,
    archive: &Path,
    options: &ImportOptions,
    outcome: &admin::ImportOutcome,
) -> AppResult<()> {
    let path = report::write_restore_report(
        dir,
        archive,
        options,
        &outcome.validation,
        &outcome.restore,
    )
    .context("restore committed but the report could not be written")
    .map_err(AppError::from)?;
    eprintln!("report: {}", path.display());
    Ok(())
}
