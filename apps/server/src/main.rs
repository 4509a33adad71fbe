//! Tidecast Server - headless broadcast server.
//!
//! Reads raw PCM from standard input and serves it as a live MP3 stream at
//! `/stream.mp3`, with optional ICY "now playing" metadata.
//!
//! ```text
//! arecord -f cd -t raw | tidecast-server --title "Live" --artist "Studio A"
//! ```

mod config;
mod stdin_source;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tidecast_core::stream::PcmDecoder;
use tidecast_core::{
    start_server, AppState, AudioQuality, LameEncoderFactory, LocalPlayer, QueueItem,
    StreamingEngine,
};
use tokio::signal;

use crate::config::ServerConfig;

/// Queue item id used for the CLI-provided title.
const INPUT_ITEM_ID: u32 = 1;

/// Tidecast Server - live MP3 broadcast of PCM read from stdin.
#[derive(Parser, Debug)]
#[command(name = "tidecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TIDECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "TIDECAST_BIND_PORT")]
    port: Option<u16>,

    /// Library name announced to ICY listeners (overrides config file).
    #[arg(short = 'n', long)]
    library_name: Option<String>,

    /// Sample rate of the PCM read from stdin (Hz).
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Bits per sample of the PCM read from stdin (16, 24 or 32).
    #[arg(long, default_value_t = 16)]
    bits: u16,

    /// Channel count of the PCM read from stdin.
    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Title announced as "now playing".
    #[arg(long)]
    title: Option<String>,

    /// Artist announced as "now playing".
    #[arg(long)]
    artist: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Tidecast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(name) = args.library_name {
        config.library_name = name;
    }

    let core_config = config.to_core_config();
    core_config
        .validate()
        .map_err(|e| anyhow!(e))
        .context("Invalid configuration")?;

    log::info!(
        "Configuration: bind_port={}, library_name='{}', bitrate={} kbps",
        config.bind_port,
        config.library_name,
        config.streaming.bitrate_kbps
    );

    // The stdin source stands in for the player
    let player = Arc::new(LocalPlayer::new());
    if args.title.is_some() || args.artist.is_some() {
        player.set_queue_item(
            INPUT_ITEM_ID,
            QueueItem {
                title: args.title.unwrap_or_default(),
                artist: args.artist.unwrap_or_default(),
            },
        );
        player.set_current_item(Some(INPUT_ITEM_ID));
    }

    let factory = Arc::new(LameEncoderFactory::new(core_config.streaming.bitrate_kbps));
    let engine = Arc::new(
        StreamingEngine::start(&core_config.streaming, player.clone(), factory)
            .context("Failed to start streaming engine")?,
    );

    let input = AudioQuality::new(args.sample_rate, args.bits, args.channels);
    PcmDecoder::validate(&input)
        .with_context(|| format!("Unusable stdin input quality {}", input))?;
    log::info!("Reading {} PCM from stdin", input);
    stdin_source::spawn(std::io::stdin(), input, engine.producer(), player)
        .context("Failed to start stdin reader")?;

    let app_state = AppState::new(Arc::clone(&engine), Arc::new(RwLock::new(core_config)));

    // Serve until a shutdown signal arrives; listeners are ended on the way out
    start_server(app_state, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    log::info!("Shutdown signal received, cleaning up...");
    engine.stop();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
