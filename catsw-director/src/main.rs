//! Scene director (catsw-director) - Main entry point
//!
//! Loads the configuration, wires the bundled adapters (ffmpeg frame grabs,
//! command-line detector, TCP chat relay, dry-run sink) into the control
//! loop and runs it until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catsw_common::config::load_config;
use catsw_director::adapters::{CommandDetector, DryRunSink, FfmpegFrameSource, TcpChatConnector};
use catsw_director::collaborators::{ChatConnector, Detector, FrameSource};
use catsw_director::{Collaborators, ControlLoop};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for catsw-director
#[derive(Parser, Debug)]
#[command(name = "catsw-director")]
#[command(about = "Vote-driven camera scene director")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CATSW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overriding the configured one (RUST_LOG wins over both)
    #[arg(long, env = "CATSW_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first so its log level can seed the filter
    let config = load_config(args.config.as_deref()).context("Failed to load configuration");
    let level = match (&args.log_level, &config) {
        (Some(level), _) => level.clone(),
        (None, Ok(config)) => config.logging.level.clone(),
        (None, Err(_)) => "info".to_string(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("catsw_director={0},catsw_common={0}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config?;
    info!(
        "Starting catsw director v{} with {} scenes",
        env!("CARGO_PKG_VERSION"),
        config.scenes.len()
    );

    let detector = match CommandDetector::new(
        &config.adapters.detector_command,
        config.detection.frame_timeout(),
    ) {
        Some(detector) => Some(Arc::new(detector) as Arc<dyn Detector>),
        None if config.detection.enabled => {
            bail!("detection is enabled but adapters.detector_command is empty")
        }
        None => None,
    };

    let chat = if config.chat.enabled {
        config.chat.addr.as_ref().map(|addr| {
            info!("Chat relay at {}", addr);
            Arc::new(TcpChatConnector::new(addr.clone(), config.chat.connect_timeout()))
                as Arc<dyn ChatConnector>
        })
    } else {
        None
    };

    let ffmpeg = config.adapters.ffmpeg_path.clone();
    let collaborators = Collaborators {
        sink: Box::new(DryRunSink::from_config(&config)),
        frames: Box::new(move |scene| {
            Arc::new(FfmpegFrameSource::new(ffmpeg.clone(), scene.rotation)) as Arc<dyn FrameSource>
        }),
        detector,
        chat,
    };

    let mut control = ControlLoop::new(config, collaborators)
        .context("Failed to initialize control loop")?;

    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = Arc::clone(&stop);
    let mut director = tokio::task::spawn_blocking(move || control.run(&loop_stop));

    let result = tokio::select! {
        _ = shutdown_signal() => {
            stop.store(true, Ordering::SeqCst);
            info!("Waiting for the control loop to stop");
            (&mut director).await
        }
        // Ends on its own only when startup fails
        result = &mut director => result,
    };

    if let Err(e) = result.context("Control loop task failed")? {
        error!("Director failed: {}", e);
        return Err(e.into());
    }
    info!("catsw director stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
