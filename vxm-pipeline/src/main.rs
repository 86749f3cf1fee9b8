//! vxm-pipeline - audio transformation service
//!
//! Ingests uploads, runs separation and voice conversion through Replicate,
//! mixes the result back together and serves artifacts over HTTP. Artifacts
//! and the result cache live under the resolved root folder.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vxm_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use vxm_pipeline::cache::{JsonFileCacheStore, ResultCache};
use vxm_pipeline::combiner::{CombinerBackend, FfmpegCombiner, NativeCombiner, StemCombiner};
use vxm_pipeline::config::{resolve_replicate_api_token, PipelineConfig};
use vxm_pipeline::orchestrator::Pipeline;
use vxm_pipeline::resolver::ReferenceResolver;
use vxm_pipeline::services::ReplicateClient;
use vxm_pipeline::store::{ArtifactStore, LocalArtifactStore, Reclaimer};
use vxm_pipeline::AppState;

const MODULE_NAME: &str = "vxm-pipeline";

/// Command-line arguments for vxm-pipeline
#[derive(Parser, Debug)]
#[command(name = "vxm-pipeline")]
#[command(about = "Audio separation, voice conversion and mixing service")]
#[command(version)]
struct Args {
    /// Root folder for artifacts and the result cache
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Listen address, overrides the TOML config
    #[arg(short, long, env = "VXM_BIND_ADDRESS")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_for_module(MODULE_NAME);

    let default_filter = format!(
        "vxm_pipeline={level},vxm_common={level},tower_http={level}",
        level = toml_config.logging.level
    );
    let file_layer = match &toml_config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting vxm-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = PipelineConfig::from_toml(&toml_config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    // Root folder: CLI → ENV → TOML → compiled default
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", initializer.root_folder().display());

    let store: Arc<dyn ArtifactStore> = Arc::new(
        LocalArtifactStore::open(initializer.artifact_dir())
            .await
            .context("Failed to open artifact store")?,
    );

    let cache_path = initializer.cache_path();
    info!("Result cache: {}", cache_path.display());
    let cache = ResultCache::new(
        Arc::new(JsonFileCacheStore::new(cache_path)),
        Arc::clone(&store),
    )
    .with_pruning(config.prune_stale_cache_entries);

    let token = resolve_replicate_api_token(&toml_config)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let replicate =
        Arc::new(ReplicateClient::new(token).context("Failed to build Replicate client")?);

    let combiner: Arc<dyn StemCombiner> = match config.combiner {
        CombinerBackend::Ffmpeg => {
            let ffmpeg = FfmpegCombiner::new(config.ffmpeg_path.clone());
            if !ffmpeg.is_available() {
                tracing::warn!(
                    path = %ffmpeg.binary_path().display(),
                    "ffmpeg not runnable; combine requests will fail until it is installed"
                );
            }
            Arc::new(ffmpeg)
        }
        CombinerBackend::Native => Arc::new(NativeCombiner::new()),
    };
    info!("Combiner: {:?}", config.combiner);

    let resolver = Arc::new(
        ReferenceResolver::new(Arc::clone(&store)).context("Failed to build HTTP client")?,
    );
    let pipeline = Arc::new(Pipeline::new(
        resolver,
        cache,
        replicate.clone(),
        replicate,
        combiner,
    ));

    let shutdown = CancellationToken::new();
    let reclaimer = Reclaimer::new(
        Arc::clone(&store),
        config.artifact_ttl,
        config.sweep_interval,
    );
    let reclaim_task = reclaimer.clone().spawn(shutdown.clone());

    let state = AppState::new(pipeline, reclaimer, config.max_upload_bytes);
    let app = vxm_pipeline::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = reclaim_task.await {
        tracing::warn!(error = %e, "Reclamation task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
