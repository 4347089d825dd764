//! storystack-ingest - photo import and auto-tag command line
//!
//! Imports photos into a collection (normalize, fingerprint, duplicate
//! check, upload, record) and auto-tags them through the classification
//! service. Deferred batches are polled until they resolve unless
//! `--no-wait` is given.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use storystack_common::config::{blob_root, database_path, load_config, resolve_root_folder};
use storystack_common::db::init_database;
use storystack_common::AutoTagStatus;
use storystack_ingest::config::{resolve_classifier_settings, IngestSettings};
use storystack_ingest::db::{AssetStore, SqliteAssetStore};
use storystack_ingest::models::{DuplicateDecision, RawPick, TagTarget, TagTrigger};
use storystack_ingest::services::{FileScanner, HttpClassificationClient, ImportRequest};
use storystack_ingest::storage::{BlobStore, LocalBlobStore};
use storystack_ingest::IngestContext;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "storystack-ingest", version, about = "Import photos and auto-tag them")]
struct Cli {
    /// Config file (default: $STORYSTACK_CONFIG, then ~/.config/storystack/ingest.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root folder holding the database and blobs
    #[arg(long, global = true, value_name = "DIR")]
    root_folder: Option<PathBuf>,

    /// Owner the assets belong to
    #[arg(long, global = true)]
    owner: Uuid,

    /// Return once requests are sent instead of waiting for deferred batches
    #[arg(long, global = true)]
    no_wait: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import photos (files or directories) into a collection
    Import {
        #[arg(long)]
        collection: Uuid,

        /// What to do when photos already exist: skip, all, cancel
        #[arg(long, default_value = "skip")]
        on_duplicates: DuplicateDecision,

        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Re-run auto-tagging for every failed asset of the owner
    RetryFailed,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let toml_config = load_config(cli.config.as_deref())?;
    init_tracing(&toml_config.logging.level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("STORYSTACK_GIT_HASH"),
        built = env!("STORYSTACK_BUILT_AT"),
        profile = env!("STORYSTACK_BUILD_PROFILE"),
        "Starting storystack-ingest"
    );

    let settings = IngestSettings::from_section(&toml_config.ingest)?;
    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    info!("Root folder: {}", root_folder.display());

    let pool = init_database(&database_path(&root_folder)).await?;
    let store = Arc::new(SqliteAssetStore::open(pool).await?);

    let blob_dir = blob_root(&root_folder);
    let blobs = Arc::new(LocalBlobStore::new(&blob_dir, settings.public_base_url_for(&blob_dir)));

    let classifier_settings = resolve_classifier_settings(&toml_config)?;
    let classifier = Arc::new(
        HttpClassificationClient::new(&classifier_settings)
            .context("Failed to build classification client")?,
    );

    let context = IngestContext::new(&settings, store, blobs, classifier);
    spawn_event_logger(&context);

    let exit = match cli.command {
        Commands::Import {
            collection,
            on_duplicates,
            paths,
        } => run_import(&context, cli.owner, collection, on_duplicates, &paths).await?,
        Commands::RetryFailed => run_retry_failed(&context, cli.owner).await?,
    };

    if !cli.no_wait && !context.poller.is_empty() {
        info!(batches = context.poller.len(), "Waiting for deferred batches");
        tokio::select! {
            _ = context.poller.wait_until_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; outstanding batches stay pending");
                context.poller.stop();
                return Ok(ExitCode::from(130));
            }
        }
    }

    print_tag_summary(&context).await;
    Ok(exit)
}

async fn run_import(
    context: &IngestContext,
    owner_id: Uuid,
    collection_id: Uuid,
    on_duplicates: DuplicateDecision,
    paths: &[PathBuf],
) -> Result<ExitCode> {
    let files = FileScanner::new().scan(paths)?;
    if files.is_empty() {
        println!("No photos found");
        return Ok(ExitCode::SUCCESS);
    }

    let mut picks = Vec::with_capacity(files.len());
    let mut unreadable = 0;
    for file in &files {
        match tokio::fs::read(file).await {
            Ok(bytes) => {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string());
                picks.push(RawPick::new(name, bytes));
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Could not read photo");
                unreadable += 1;
            }
        }
    }

    let report = context
        .pipeline
        .import(
            ImportRequest {
                owner_id,
                collection_id,
                picks,
            },
            on_duplicates,
        )
        .await;

    if report.cancelled {
        println!("Import cancelled: {} photos already exist", report.duplicates.len());
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "Imported {} of {} photos ({} duplicates skipped)",
        report.created.len(),
        files.len(),
        report.skipped_duplicates.len()
    );
    if report.degraded {
        println!("Note: duplicate detection is unavailable for this store");
    }
    for failure in &report.failures {
        warn!(
            photo = %failure.name,
            stage = ?failure.stage,
            error = %failure.message,
            "Photo not imported"
        );
    }

    if report.user_summary().is_some() || unreadable > 0 {
        eprintln!("{}", storystack_ingest::services::IMPORT_FAILURE_MESSAGE);
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_retry_failed(context: &IngestContext, owner_id: Uuid) -> Result<ExitCode> {
    let failed = context
        .store
        .list_by_status(owner_id, AutoTagStatus::Failed)
        .await?;
    if failed.is_empty() {
        println!("No failed assets");
        return Ok(ExitCode::SUCCESS);
    }

    let targets: Vec<TagTarget> = failed
        .into_iter()
        .map(|asset| {
            let image_url = context.blobs.public_url(&asset.storage_path);
            let current_status = asset.auto_tag_status;
            let asset_id = asset.id;
            context.shadow.track(asset);
            TagTarget {
                asset_id,
                image_url,
                current_status,
            }
        })
        .collect();

    let report = context.dispatcher.dispatch(targets, TagTrigger::User).await;
    println!(
        "Retried {} assets ({:?} path)",
        report.dispatched.len(),
        report.path
    );
    Ok(ExitCode::SUCCESS)
}

/// Auto-tag status of every asset held this session
async fn print_tag_summary(context: &IngestContext) {
    let tracked = context.registry.tagging_snapshot();
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();

    for asset_id in context.shadow.ids() {
        if let Ok(Some(asset)) = context.store.get_asset(asset_id).await {
            *counts.entry(asset.auto_tag_status.as_str()).or_default() += 1;
            if let Some(failure) = context.registry.last_failure(asset_id) {
                println!("  {}: {}", asset_id, failure);
            }
        }
    }

    if !counts.is_empty() {
        let summary: Vec<String> = counts.iter().map(|(s, n)| format!("{} {}", n, s)).collect();
        println!("Auto-tag: {}", summary.join(", "));
    }
    if !tracked.is_empty() {
        println!("Still tagging: {}", tracked.len());
    }
}

/// Log every ingest event at debug level
fn spawn_event_logger(context: &IngestContext) {
    let mut rx = context.event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::debug!(event = event.event_type(), ?event, "Ingest event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event logger lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
