// Ocular detection server

use anyhow::Context;
use clap::Parser;
use ocular_eye::{DetectionAdapter, DetectionEngine, Device, EngineSettings};
use ocular_server::config::LogFormat;
use ocular_server::debug_sink::{DebugSink, DiskFrameStore};
use ocular_server::{create_router, AppState, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ocular-server")]
#[command(about = "Batched streaming object detection over WebSocket")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// ONNX model path
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Inference device: auto, cpu or cuda
    #[arg(short, long)]
    device: Option<Device>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let result = runtime.block_on(serve(config));
    // Blocking inference still running gets at most the grace period
    runtime.shutdown_timeout(grace);
    result
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(model) = &cli.model {
        config.model.path = model.clone();
    }
    if let Some(device) = cli.device {
        config.model.device = device;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid log level '{}'", config.log_level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;

    info!("Loading detection model from {:?}", config.model.path);
    let engine = load_engine(config.model.clone()).await?;
    let adapter = DetectionAdapter::new(engine);
    info!("Model {} ready on {}", adapter.model_name(), adapter.device());

    if config.model.warm_up {
        adapter.warm_up().await.context("Model warm-up failed")?;
    }

    let store = Arc::new(DiskFrameStore::new(config.debug.dir.clone()));
    let (debug_sink, _debug_worker) = DebugSink::spawn(store, config.debug.queue_capacity);
    info!("Debug images are written to {:?}", config.debug.dir);

    let state = Arc::new(AppState {
        adapter,
        debug_sink: Some(debug_sink),
        framing: config.result_framing,
        debug_dir: config.debug.dir.clone(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Ocular server listening on http://{} (WebSocket at /ws)", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("Ocular server stopped");
    Ok(())
}

#[cfg(feature = "onnx")]
async fn load_engine(settings: EngineSettings) -> anyhow::Result<Box<dyn DetectionEngine>> {
    let engine = tokio::task::spawn_blocking(move || ocular_eye::models::YoloEngine::new(&settings))
        .await
        .context("Model loading task failed")?
        .context("Failed to load detection model")?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "onnx"))]
async fn load_engine(_settings: EngineSettings) -> anyhow::Result<Box<dyn DetectionEngine>> {
    anyhow::bail!("ocular-server was built without an inference backend; enable the `onnx` feature")
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
