use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use continuo::audio::{AudioSystem, CpalAudio, NullAudio};
use continuo::config::AppConfig;
use continuo::events::SessionEvent;
use continuo::live::LoopbackConnector;
use continuo::session::SessionController;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Continuo command line arguments
#[derive(Parser, Debug)]
#[command(name = "continuo")]
#[command(version, about = "Realtime musical continuation sessions", long_about = None)]
struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Audio file to upload as a continuation request after connecting
    #[arg(long, value_name = "FILE")]
    clip: Option<PathBuf>,

    /// Model name (overrides config)
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Run without audio devices (file upload only)
    #[arg(long)]
    no_audio: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging with CLI arguments
    init_logging(args.log_level, args.verbose);

    tracing::info!(
        "Starting Continuo v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    // Load configuration, applying CLI overrides
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.live.model = model;
    }
    tracing::info!("Model: {}", config.live.model);

    let audio: Arc<dyn AudioSystem> = if args.no_audio {
        tracing::info!("Audio devices disabled, running in upload-only mode");
        Arc::new(NullAudio)
    } else {
        Arc::new(CpalAudio::new(config.audio.clone()))
    };

    let controller = Arc::new(SessionController::new(
        config,
        Arc::new(LoopbackConnector),
        audio,
    ));

    // Mirror session events to the terminal
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::TextReceived { text }) => println!("{text}"),
                Ok(SessionEvent::StateChanged { state }) => {
                    tracing::info!("Session state: {}", state.name_str());
                }
                Ok(SessionEvent::UploadStateChanged { state, attempt }) => {
                    tracing::info!("Upload {} (attempt {})", state.name_str(), attempt);
                }
                Ok(SessionEvent::Error { message }) => {
                    tracing::error!("Session error: {}", message);
                }
                Ok(SessionEvent::TurnComplete) => {
                    tracing::info!("Model turn complete");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event stream lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    controller.connect().await?;

    if let Some(ref clip) = args.clip {
        tracing::info!("Uploading clip: {}", clip.display());
        controller.upload_clip(clip).await?;
    }

    tracing::info!("Session running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    controller.disconnect().await;
    tracing::info!("Session closed");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "continuo=error",
        LogLevel::Warn => "continuo=warn",
        LogLevel::Info => "continuo=info",
        LogLevel::Debug => "continuo=debug",
        LogLevel::Trace => "continuo=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
