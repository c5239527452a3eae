//! Kiln CLI
//!
//! Drives the pipeline from the command line: sync a conversation dump,
//! assemble a topic, recall bricks, validate graph integrity, or rebuild the
//! vector index.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_core::graph::validation::run_integrity_sweep;
use kiln_core::pipeline::{SyncOptions, SyncPipeline, rebuild_index};
use kiln_core::vector::{LocalEmbedder, VectorIndexConfig};

use kiln_server::extractor::OfflineExtractor;
use kiln_server::state::{StateOptions, build_state};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Conversation-to-knowledge compiler")]
struct Cli {
    /// Kiln data directory (database, audit log, index, artifacts)
    #[arg(long, global = true, default_value = "./kiln-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a conversation dump and compile every run against every topic
    Sync {
        /// Path to the conversations JSON dump
        input: PathBuf,
        /// Preserve typed content blocks and provenance per message
        #[arg(long)]
        rich: bool,
    },
    /// Assemble a content-addressed cognition artifact for a topic query
    Assemble {
        /// The topic query
        query: String,
    },
    /// Recall bricks for a query
    Recall {
        /// The search query
        query: String,
        /// How many results
        #[arg(short, default_value_t = 10)]
        k: usize,
        /// Comma-separated allowed scopes
        #[arg(long, default_value = "global")]
        scopes: String,
    },
    /// Run graph integrity sweeps; exits nonzero on violations
    Validate,
    /// Rebuild the vector index from the brick table
    Reindex,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Sync { input, rich } => {
            let pipeline = SyncPipeline::open(&cli.data_dir, Arc::new(OfflineExtractor))?;
            let report = pipeline.run_sync(
                &input,
                SyncOptions {
                    rich_ingest: rich,
                    ..Default::default()
                },
            )?;
            println!(
                "synced {} conversations: {} runs, {} new bricks ({} failed compiles)",
                report.conversations_processed,
                report.runs_registered,
                report.bricks_created,
                report.runs_failed,
            );
        }
        Command::Assemble { query } => {
            let state = build_state(&cli.data_dir, Arc::new(OfflineExtractor), StateOptions::default())?;
            let artifact = state.assembler.assemble_topic(&query)?;
            println!("{} -> {}", artifact.artifact_id, artifact.path.display());
        }
        Command::Recall { query, k, scopes } => {
            let state = build_state(&cli.data_dir, Arc::new(OfflineExtractor), StateOptions::default())?;
            let scopes: Vec<String> = scopes.split(',').map(|s| s.trim().to_string()).collect();
            let results = state.recall.recall(&query, k, &scopes, false)?;
            if results.is_empty() {
                println!("no matches");
            }
            for result in results {
                println!(
                    "{:.3} [{}] {} :: {}",
                    result.confidence,
                    result.reranker_used,
                    result.brick_id,
                    result.brick_text.chars().take(80).collect::<String>(),
                );
            }
        }
        Command::Validate => {
            let pipeline = SyncPipeline::open(&cli.data_dir, Arc::new(OfflineExtractor))?;
            let report = run_integrity_sweep(&pipeline.graph())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Command::Reindex => {
            let pipeline = SyncPipeline::open(&cli.data_dir, Arc::new(OfflineExtractor))?;
            let embedder = LocalEmbedder::new();
            let index = rebuild_index(
                &pipeline.sync_store(),
                &embedder,
                VectorIndexConfig::default(),
            )?;
            let path = cli.data_dir.join("index").join("bricks.usearch");
            index.save(&path).context("persisting index")?;
            println!("rebuilt index with {} bricks at {}", index.len(), path.display());
        }
    }

    Ok(())
}
