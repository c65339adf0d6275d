use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vagas_core::{resolve_uid, Source, UidHints};
use vagas_storage::{PgPostingStore, PostingStore};
use vagas_sync::{run_scheduled, Scheduler, SourceRegistry, SyncConfig, SyncPipeline};

#[derive(Debug, Parser)]
#[command(name = "vagas")]
#[command(about = "Crawl job listings into a deduplicated Postgres table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single crawl cycle.
    Sync,
    /// Run cycles on the configured schedule until Ctrl-C.
    Run,
    /// Create the postings table and its uid index.
    Migrate,
    /// Print the canonical link and uid a raw link resolves to.
    Resolve {
        url: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        native_id: Option<String>,
        #[arg(long, env = "VAGAS_SOURCES_FILE", default_value = "./sources.yaml")]
        sources_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("vagas_cli=info,vagas_sync=info,vagas_storage=info,vagas_adapters=warn")
        }))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let config = SyncConfig::from_env()?;
            let pipeline = SyncPipeline::from_config(&config).await?;
            let summary = pipeline.run_cycle().await;
            println!(
                "sync complete: cycle_id={} fetched={} extracted={} unique={} written={} failed_sources={}",
                summary.cycle_id,
                summary.fetched,
                summary.extracted,
                summary.deduplicated,
                summary.written,
                summary.failed_sources().count()
            );
            if let Some(err) = &summary.persistence_error {
                eprintln!("persistence failed: {err}");
            }
        }
        Commands::Run => {
            let config = SyncConfig::from_env()?;
            let scheduler = Scheduler::new(config.schedule.clone(), config.utc_offset_hours)?;
            let pipeline = SyncPipeline::from_config(&config).await?;
            tracing::info!(schedule = ?config.schedule, "scheduler started");
            let completed = run_scheduled(&pipeline, scheduler, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "listening for ctrl-c failed");
                }
            })
            .await;
            println!("scheduler stopped after {completed} cycles");
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let store = PgPostingStore::connect(&config.database_url, config.store_timeout()).await?;
            store.ensure_schema().await.context("creating job_postings")?;
            println!("schema ready: {} rows", store.count().await?);
        }
        Commands::Resolve {
            url,
            source,
            native_id,
            sources_file,
        } => {
            let catalog = SourceRegistry::load_or_builtin(&sources_file)?.catalog()?;
            let profile = catalog.profile_for(&Source::parse(&source));
            let resolved = resolve_uid(
                &url,
                &profile,
                UidHints {
                    native_id: native_id.as_deref(),
                },
            )
            .with_context(|| format!("resolving {url}"))?;
            println!("uid: {}", resolved.uid);
            println!("canonical_link: {}", resolved.canonical_link);
            println!("rule: {:?}", resolved.rule);
        }
    }

    Ok(())
}
