use anyhow::{Context, Result};
use clap::Parser;
use duplex_voice::audio::AudioDeviceProvider;
use duplex_voice::session::LoggingObserver;
use duplex_voice::{Config, LiveSession, SessionConfig, WavDevices, WebSocketTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "duplex-voice", about = "Run a live duplex voice session")]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/duplex-voice")]
    config: String,

    /// WAV file to use as the microphone
    #[arg(long)]
    input: Option<PathBuf>,

    /// WAV file to write the remote audio to
    #[arg(long)]
    output: Option<PathBuf>,

    /// Instructions for the remote assistant
    #[arg(long)]
    instructions: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Use the default microphone and speaker instead of WAV files
    #[cfg(feature = "host-audio")]
    #[arg(long)]
    host_audio: bool,
}

fn devices(cli: &Cli, cfg: &Config) -> Result<Arc<dyn AudioDeviceProvider>> {
    #[cfg(feature = "host-audio")]
    if cli.host_audio {
        return Ok(Arc::new(duplex_voice::audio::HostDevices::new()));
    }

    let input = cli
        .input
        .clone()
        .or_else(|| cfg.audio.input_path.as_ref().map(PathBuf::from))
        .context("No input WAV given (use --input or audio.input_path)")?;
    let output = cli
        .output
        .clone()
        .or_else(|| cfg.audio.output_path.as_ref().map(PathBuf::from));

    Ok(Arc::new(WavDevices::new(input, output)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Duplex Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Remote endpoint: {} ({})", cfg.transport.url, cfg.transport.model);

    let transport = Arc::new(WebSocketTransport::new(cfg.transport.websocket_config())?);
    let devices = devices(&cli, &cfg)?;
    let session = LiveSession::new(transport, devices, Arc::new(LoggingObserver));

    let session_config = SessionConfig {
        instructions: cli.instructions.clone().or(cfg.session.instructions.clone()),
        ..SessionConfig::default()
    };
    session.start(session_config).await?;

    let limit = async {
        match cli.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping session"),
        _ = limit => info!("Time limit reached, stopping session"),
        state = session.closed() => info!("Session ended: {}", state),
    }

    session.stop().await;

    let stats = session.stats();
    info!("Session stats:\n{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
