//! CLI arguments and the stream command

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use streamtide_core::StreamtideError;
use streamtide_core::config::StreamtideConfig;
use streamtide_core::engine::{DownloadEngine, EngineError};
use streamtide_core::session::{ConstructionError, StreamSession, TorrentSource};
use streamtide_core::tracing_setup::{CliLogLevel, init_tracing};
use streamtide_rqbit::RqbitEngine;
use streamtide_sim::LocalSwarmEngine;
use streamtide_web::{AppState, run_server};
use tokio_util::sync::CancellationToken;

use crate::dashboard;

/// Command line of the `streamtide` binary
#[derive(Parser, Debug)]
#[command(name = "streamtide")]
#[command(about = "Stream a torrent's largest file over HTTP while it downloads")]
#[command(version)]
pub struct StreamArgs {
    /// Magnet link, http(s) URL of a .torrent file, or path to a .torrent file
    pub source: String,

    /// Port to serve the stream on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Keep peer connections open after the download completes
    #[arg(long)]
    pub seed: bool,

    /// Download from a local seed directory instead of the BitTorrent swarm
    #[arg(long, value_name = "DIR")]
    pub swarm_dir: Option<PathBuf>,

    /// Directory for partially downloaded data
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Simulated peer connections per torrent (local swarm only)
    #[arg(long, value_name = "N")]
    pub peers: Option<usize>,

    /// Download rate limit (local swarm only)
    #[arg(long, value_name = "BYTES_PER_SEC")]
    pub rate: Option<u64>,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::default())]
    pub log_level: CliLogLevel,

    /// Do not draw the progress dashboard
    #[arg(long)]
    pub no_dashboard: bool,
}

impl StreamArgs {
    /// Default configuration with the command line applied on top.
    pub fn config(&self) -> StreamtideConfig {
        let mut config = StreamtideConfig::default();
        config.server.host = self.host;
        config.server.port = self.port;
        config.engine.seed = self.seed;
        if let Some(dir) = &self.data_dir {
            config.engine.data_dir = dir.clone();
        }
        if let Some(dir) = &self.swarm_dir {
            config.swarm.swarm_dir = dir.clone();
        }
        if let Some(peers) = self.peers {
            config.swarm.peers = peers;
        }
        config.swarm.download_rate = self.rate;
        config.display.enabled = !self.no_dashboard;
        config
    }

    /// Whether torrents come from a local seed directory.
    pub fn uses_local_swarm(&self) -> bool {
        self.swarm_dir.is_some()
    }
}

async fn start_engine(
    args: &StreamArgs,
    config: &StreamtideConfig,
) -> Result<Arc<dyn DownloadEngine>, EngineError> {
    if args.uses_local_swarm() {
        let engine = LocalSwarmEngine::new(&config.swarm, &config.engine).await?;
        tracing::info!(
            "Local swarm at {} with {} seeds",
            config.swarm.swarm_dir.display(),
            engine.seed_count()
        );
        return Ok(Arc::new(engine));
    }
    Ok(Arc::new(RqbitEngine::new(&config.engine).await?))
}

/// Logs a startup failure in full and turns it into the short message the
/// user sees.
fn startup_error(error: impl Into<StreamtideError>) -> anyhow::Error {
    let error = error.into();
    tracing::error!("Startup failed: {}", error);
    anyhow!(error.user_message())
}

/// Runs a stream session until Ctrl-C.
///
/// # Errors
/// - Logging could not be initialized
/// - `ConstructionError` - Engine or session failed to start
/// - `WebError` - Content server could not bind or stopped unexpectedly
pub async fn run(args: StreamArgs) -> anyhow::Result<()> {
    let log_file = init_tracing(args.log_level.as_tracing_level(), None)
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;
    let config = args.config();
    tracing::debug!("Trace log at {}", log_file.display());

    let engine = start_engine(&args, &config)
        .await
        .map_err(|e| startup_error(ConstructionError::EngineInit(e)))?;

    let session = StreamSession::start(
        engine,
        TorrentSource::parse(&args.source),
        config.streaming.clone(),
    )
    .await
    .map_err(startup_error)?;

    let shutdown = CancellationToken::new();
    let stream_url = config.server.stream_url();
    let state = AppState {
        session: session.clone(),
        stream_url: stream_url.clone(),
    };
    let mut server = tokio::spawn(run_server(
        state,
        config.server.bind_addr(),
        shutdown.clone(),
    ));
    let monitor = tokio::spawn(dashboard::run(
        session.clone(),
        stream_url,
        config.display.clone(),
        shutdown.clone(),
    ));

    let server_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted, shutting down");
            None
        }
        finished = &mut server => Some(finished),
    };

    session.shutdown().await;
    shutdown.cancel();
    if let Err(e) = monitor.await {
        tracing::warn!("Dashboard task failed: {}", e);
    }

    let finished = match server_exit {
        Some(finished) => finished,
        None => server.await,
    };
    match finished {
        Ok(result) => result.context("content server failed"),
        Err(e) => Err(anyhow!("content server task failed: {e}")),
    }
}
