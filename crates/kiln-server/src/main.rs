//! Kiln HTTP server
//!
//! Serves the contract endpoints over one kiln data directory: topic
//! assembly, audit reads, run inspection, graph snapshots and governance
//! writes, and scope-aware recall.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use kiln_server::extractor::OfflineExtractor;
use kiln_server::routes;
use kiln_server::state::{StateOptions, build_state};

#[derive(Parser)]
#[command(name = "kiln-server", version, about = "HTTP surface for the kiln knowledge compiler")]
struct Args {
    /// Kiln data directory (database, audit log, index, artifacts)
    #[arg(long, default_value = "./kiln-data")]
    data_dir: PathBuf,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1:7474")]
    bind: String,

    /// Load the cross-encoder reranker stage at startup
    #[arg(long)]
    cross_encoder: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let state = build_state(
        &args.data_dir,
        Arc::new(OfflineExtractor),
        StateOptions {
            cross_encoder: args.cross_encoder,
        },
    )?;

    let app = routes::router(Arc::new(state)).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!("kiln-server listening on {}", args.bind);

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
