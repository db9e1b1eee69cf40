mod api;
mod config;
mod debounce;
mod pipeline;
mod state;
mod upload;
mod utils;
mod watch;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api::api_router;
use clap::{Parser, Subcommand};
use config::{config_path, load_or_create_config, resolve_path, resolve_target, ServerConfig};
use library::{FsBlobStore, LoftyTagReader, RedbStore, Synchronizer, TransactionalStore};
use pipeline::{SyncPipeline, UploadOptions};
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use upload::SpoolQueue;

#[derive(Debug, Parser)]
#[command(name = "tagdex", version, about = "Indexes audio tags for substring search")]
struct Cli {
    /// Config file; defaults to $TAGDEX_CONFIG or config.yaml beside the binary.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the target tree and keep the index in sync.
    Sync {
        /// Touch every file under the target once at startup.
        #[arg(long)]
        full: bool,
        /// Delete every index entry before starting.
        #[arg(long)]
        clear_index: bool,
    },
    /// Serve the query endpoint.
    Serve {
        /// Also run the sync pipeline in this process.
        #[arg(long)]
        watch: bool,
    },
}

struct Resources {
    store: Arc<RedbStore>,
    needs_reindex: bool,
    blobs: Arc<FsBlobStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = config_path(cli.config);
    let (config, created) = load_or_create_config(&config_path)?;
    init_logging(&config_path, &config)?;

    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    info!("target = {}", config.target);
    info!("index_path = {}", config.index_path);
    info!("blob_root = {}", config.blob_root);
    info!(
        "buckets: album art = {}, pieces = {}",
        config.album_art_bucket, config.piece_bucket
    );

    let resources = open_resources(&config_path, &config)?;
    match cli.command {
        Command::Sync { full, clear_index } => {
            run_sync(&config_path, &config, resources, full, clear_index).await
        }
        Command::Serve { watch } => run_serve(&config_path, &config, resources, watch).await,
    }
}

fn init_logging(config_path: &Path, config: &ServerConfig) -> std::io::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let log_file = config.log_file.trim();
    if log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    }

    let now = time::OffsetDateTime::now_utc();
    let base = resolve_path(config_path, log_file);
    let path = PathBuf::from(format!(
        "{}-{:04}-{:02}",
        base.display(),
        now.year(),
        u8::from(now.month())
    ));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    eprintln!("Logging to {}", path.display());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn open_resources(
    config_path: &Path,
    config: &ServerConfig,
) -> Result<Resources, Box<dyn std::error::Error>> {
    let index_path = resolve_path(config_path, &config.index_path);
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let (store, needs_reindex) = RedbStore::open(&index_path)?;
    let blobs = FsBlobStore::new(resolve_path(config_path, &config.blob_root));
    Ok(Resources {
        store: Arc::new(store),
        needs_reindex,
        blobs: Arc::new(blobs),
    })
}

fn start_pipeline(
    config_path: &Path,
    config: &ServerConfig,
    resources: &Resources,
    full: bool,
) -> Result<SyncPipeline, Box<dyn std::error::Error>> {
    let target = resolve_target(config_path, &config.target)
        .ok_or("target is not configured")?;
    if !target.is_dir() {
        return Err(format!("target {} is not a directory", target.display()).into());
    }

    let full = if resources.needs_reindex && !full {
        info!("Index is empty or from an older format; running a full rescan");
        true
    } else {
        full
    };

    let synchronizer = Synchronizer::new(
        target,
        Arc::clone(&resources.store),
        Arc::clone(&resources.blobs),
        LoftyTagReader,
        config.album_art_bucket.clone(),
    );
    let upload = UploadOptions {
        queue: SpoolQueue::open(resolve_path(config_path, &config.upload_spool))?,
        bucket: config.piece_bucket.clone(),
        poll: Duration::from_secs(config.upload_poll_secs),
    };
    Ok(SyncPipeline::start(
        synchronizer,
        Arc::clone(&resources.blobs),
        full,
        Some(upload),
    )?)
}

async fn run_sync(
    config_path: &Path,
    config: &ServerConfig,
    resources: Resources,
    full: bool,
    clear_index: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if clear_index {
        info!("Clearing index...");
        match resources.store.clear_index() {
            Ok(removed) => info!("Cleared {} index entries", removed),
            Err(err) => warn!("Failed to clear index: {}", err),
        }
    }

    let pipeline = start_pipeline(config_path, config, &resources, full)?;
    shutdown_signal().await;
    pipeline.shutdown().await;
    Ok(())
}

async fn run_serve(
    config_path: &Path,
    config: &ServerConfig,
    resources: Resources,
    watch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if resources.needs_reindex && !watch {
        warn!("Index is empty; run `tagdex sync --full` to populate it");
    }
    let pipeline = if watch {
        Some(start_pipeline(config_path, config, &resources, false)?)
    } else {
        None
    };

    let state = AppState {
        store: Arc::clone(&resources.store),
        blobs: Arc::clone(&resources.blobs),
        default_list_limit: config.default_list_limit,
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    };
    let app = api_router(state)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pipeline) = pipeline {
        pipeline.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
