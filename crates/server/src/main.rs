//! The hangard binary: configuration, startup recovery, and serving.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hangar_core::config::AppConfig;
use hangar_metadata::MetadataStore;
use hangar_server::upload::recovery;
use hangar_server::{AppState, create_router};
use hangar_storage::BlobStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hangar - a chunked archive upload coordinator
#[derive(Parser, Debug)]
#[command(name = "hangard")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "HANGAR_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence when set. The fallback stays at plain
    // `info`: per-request spans from the HTTP trace layer emit at debug,
    // so chunk traffic only shows up when an operator opts in.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hangar v{}", env!("CARGO_PKG_VERSION"));

    // Configuration layering: the TOML file seeds the figment when present,
    // HANGAR_* environment variables override it, serde defaults fill the
    // rest. A missing file is fine; the defaults alone are a valid config.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HANGAR_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    // Storage directories are created up front so the first chunk request
    // never pays for (or races) directory creation.
    let blobs = Arc::new(
        BlobStore::new(&config.storage.upload_dir)
            .await
            .context("failed to initialize blob storage")?,
    );
    tokio::fs::create_dir_all(&config.storage.temp_dir)
        .await
        .context("failed to create temp directory")?;
    tracing::info!(
        upload_dir = %config.storage.upload_dir.display(),
        "Blob storage initialized"
    );

    // Opening the store runs migrations; the health check catches a
    // database that opened but cannot answer queries before we bind.
    let metadata = hangar_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), metadata, blobs);

    // Startup recovery: drive every non-terminal session left behind by a
    // previous process to a well-defined state before accepting requests.
    let report = recovery::run_sweeps(&state)
        .await
        .context("startup recovery failed")?;
    tracing::info!(?report, "Startup recovery finished");

    // Periodic sweeps for abandonment and missed finalization triggers
    let _sweeper = recovery::spawn_periodic(state.clone());
    tracing::info!(
        interval_secs = config.upload.cleanup_interval_secs,
        "Recovery sweeper spawned"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
