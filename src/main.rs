#![forbid(unsafe_code)]

//! `archivetube` binary: store initialisation, archive registration and
//! indexing, statistics and the HTTP server.

mod cli;

use std::path::Path;

use anyhow::{Context, Result, bail};
use archivetube::{
    config::{RuntimeOverrides, ServerConfig, resolve_server_config},
    metadata::MetadataStore,
    preflight::{ensure_data_dir, ensure_not_root},
    registry::ArchiveRegistry,
    server, statistics,
};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "archivetube=debug,tower_http=debug"
    } else {
        "archivetube=info,tower_http=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    ensure_not_root("archivetube")?;

    match cli.command {
        Some(Commands::Init { dir }) => init(&dir).await,
        Some(Commands::Stats { dir }) => stats(&dir).await,
        None => run(cli.run).await,
    }
}

async fn init(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let config = ServerConfig::for_data_dir(dir);
    let existed = config.db_path().exists();
    let store = MetadataStore::open(&config.db_path()).await?;
    store.refresh_info(Utc::now().timestamp()).await?;
    if existed {
        println!("{} is already initialized", config.db_path().display());
    } else {
        println!("Created {}", config.db_path().display());
    }
    Ok(())
}

async fn open_existing_store(config: &ServerConfig) -> Result<MetadataStore> {
    ensure_data_dir(&config.data_dir)?;
    let db_path = config.db_path();
    if !db_path.is_file() {
        bail!(
            "{} not found; run `archivetube init {}` first",
            db_path.display(),
            config.data_dir.display()
        );
    }
    MetadataStore::open(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))
}

async fn run(args: RunArgs) -> Result<()> {
    let Some(dir) = args.dir else {
        bail!("missing working directory");
    };
    let config = resolve_server_config(
        &dir,
        RuntimeOverrides {
            host: args.host,
            port: args.port,
            page_size: args.page_size,
            env_path: None,
        },
    )?;
    let store = open_existing_store(&config).await?;
    let registry = ArchiveRegistry::new(&store, &config);

    if let Some(folder) = args.folder {
        let location = registry
            .register(&folder, args.recursive)
            .await
            .with_context(|| format!("registering {}", folder.display()))?;
        let kind = if location.recursive {
            "parent directory"
        } else {
            "archive"
        };
        println!("Registered {kind} {}", location.relpath);
    }

    println!("Indexing archives...");
    let summary = registry.reindex(Utc::now().timestamp()).await?;
    println!(
        "Indexed {} archives: {} channels, {} videos",
        summary.archives, summary.channels, summary.videos
    );
    for failure in &summary.failures {
        println!("  skipped: {failure}");
    }

    if args.no_serve {
        return Ok(());
    }
    server::serve(config).await
}

async fn stats(dir: &Path) -> Result<()> {
    let config = ServerConfig::for_data_dir(dir);
    let store = open_existing_store(&config).await?;
    let videos = store.reader().list_all_videos().await?;
    let stats = statistics::calculate(&videos);
    store
        .replace_statistics(&stats, Utc::now().timestamp())
        .await
        .context("storing statistics")?;
    println!(
        "Calculated statistics for {} videos across {} weeks",
        stats.overall.videos,
        stats.weekly.len()
    );
    Ok(())
}
