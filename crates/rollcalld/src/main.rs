use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    Clock, CueTable, IdentityDirectory, KnnClassifier, Pipeline, PipelineContext, PipelineOptions,
    SystemClock,
};
use rollcall_vision::{session_threads, OnnxExtractor};
use rollcalld::api::{build_router, AppState, RouterOptions, ServiceInfo};
use rollcalld::capture::FsCaptureStore;
use rollcalld::config::Config;
use rollcalld::rollover::spawn_rollover;
use rollcalld::roster::read_roster;
use rollcalld::store::SqliteLedger;
use rollcalld::workers::WorkerPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcalld", version, about = "Rollcall face-recognition attendance daemon")]
struct Cli {
    /// Configuration file (TOML). A missing file means built-in defaults.
    #[arg(short, long, env = "ROLLCALL_CONFIG", default_value = "rollcall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Add identities from a roster of {name, universitas, kategori} records
    ImportIdentities {
        /// CSV file with a name,universitas,kategori header, or a JSON array
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::ImportIdentities { file } => import_identities(&config, &file).await,
    }
}

async fn open_store(config: &Config) -> Result<SqliteLedger> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    SqliteLedger::open(&db_path)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))
}

fn load_cues(config: &Config) -> Result<CueTable> {
    let path = config.audio_cues_path();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no audio cue table; successes will answer without a welcome cue");
        return Ok(CueTable::new(HashMap::new(), config.cues.clone()));
    }
    CueTable::from_json_file(&path, config.cues.clone())
        .with_context(|| format!("loading audio cues from {}", path.display()))
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let zone = config.zone()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(zone));
    tracing::info!(%zone, today = %clock.today(), "attendance days counted in local time");
    let store = Arc::new(open_store(&config).await?);

    let identities = store.load_identities().await.context("loading identities")?;
    if identities.is_empty() {
        tracing::warn!("identity store is empty; every recognized face will be reported as not found");
    }
    let directory = Arc::new(IdentityDirectory::new(identities));
    let cues = Arc::new(load_cues(&config)?);

    let gallery_path = config.gallery_path();
    let classifier = Arc::new(
        KnnClassifier::from_json_file(&gallery_path, config.knn_k, config.similarity_threshold())
            .with_context(|| format!("loading gallery {}", gallery_path.display()))?,
    );

    let model_dir = config.model_dir();
    let allow_multiple = config.allow_multiple_faces;
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let intra_threads = session_threads(config.workers, cores);
    tracing::info!(workers = config.workers, cores, intra_threads, "starting extraction workers");
    let pool = WorkerPool::spawn(config.workers, classifier.clone(), |_| {
        OnnxExtractor::load(&model_dir, intra_threads)
            .map(|e| if allow_multiple { e.allow_multiple_faces() } else { e })
    })
    .context("starting extraction workers")?;
    let info = ServiceInfo {
        gallery_size: classifier.len(),
        gallery_labels: classifier.label_count(),
        workers: pool.size(),
    };

    let capture_dir = config.capture_dir();
    std::fs::create_dir_all(&capture_dir)
        .with_context(|| format!("creating capture directory {}", capture_dir.display()))?;

    let ctx = PipelineContext {
        directory,
        ledger: store,
        captures: Arc::new(FsCaptureStore::new(&capture_dir)),
        cues,
        clock,
    };
    let options = PipelineOptions {
        require_capture: config.require_capture,
    };
    let pipeline = Arc::new(
        Pipeline::start(Arc::new(pool), ctx, options)
            .await
            .context("warming attendance cache")?,
    );
    tracing::info!(
        identities = pipeline.directory().len(),
        attended_today = pipeline.cache().len(),
        day = %pipeline.cache().day(),
        "pipeline ready"
    );

    let rollover = spawn_rollover(pipeline.clone());
    let app = build_router(
        AppState {
            pipeline,
            info: Arc::new(info),
        },
        RouterOptions {
            capture_dir: &capture_dir,
            max_body_bytes: config.max_body_bytes,
        },
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    rollover.abort();
    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c; shutting down");
    }
}

async fn import_identities(config: &Config, file: &Path) -> Result<()> {
    let records = read_roster(file).with_context(|| format!("loading roster {}", file.display()))?;
    let total = records.len();

    let store = open_store(config).await?;
    let added = store
        .import_identities(records)
        .await
        .context("importing identities")?;
    tracing::info!(file = %file.display(), total, added, "identities imported");
    println!("Imported {added} new identities ({} already present or skipped).", total - added);
    println!("Restart rollcalld to pick them up.");
    Ok(())
}
