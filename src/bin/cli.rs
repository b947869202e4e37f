//! CLI binary for parley.

use clap::{Parser, Subcommand};
use parley::audio::capture::CpalCapture;
use parley::audio::playback::CpalSink;
use parley::pipeline::messages::ControlEvent;
use parley::{RuntimeEvent, SessionController, SessionServices, SpeechConfig};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parley: turn-taking voice sessions against HTTP speech services.
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice session.
    Chat,

    /// List available audio devices.
    Devices,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
        Command::Config => print_config(&config),
    }
}

/// Explicit path if given, else the default path if it exists, else defaults.
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SpeechConfig> {
    let config = match path {
        Some(path) => SpeechConfig::from_file(path)?,
        None => {
            let default_path = SpeechConfig::default_config_path();
            if default_path.exists() {
                info!("loading config from {}", default_path.display());
                SpeechConfig::from_file(&default_path)?
            } else {
                SpeechConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

async fn run_chat(config: SpeechConfig) -> anyhow::Result<()> {
    println!("Parley v{}", env!("CARGO_PKG_VERSION"));

    let sink = CpalSink::new(&config.audio)?;
    let source = CpalCapture::new(&config.audio);
    let services = SessionServices::http(&config.services);

    let (event_tx, event_rx) = broadcast::channel::<RuntimeEvent>(256);
    let session = SessionController::new(config, services, Box::new(sink))
        .with_runtime_events(event_tx);
    let cancel = session.cancel_token();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });
    tokio::spawn(print_transcript(event_rx));

    println!("\nReady! Speak into your microphone. Press Ctrl+C to stop.\n");

    session.run(Box::new(source)).await?;

    Ok(())
}

/// Show the conversation as it happens.
async fn print_transcript(mut rx: broadcast::Receiver<RuntimeEvent>) {
    loop {
        match rx.recv().await {
            Ok(RuntimeEvent::Transcription { text, .. }) => println!("you: {text}"),
            Ok(RuntimeEvent::AssistantReply { text, .. }) => println!("assistant: {text}"),
            Ok(RuntimeEvent::Control(ControlEvent::AssistantSpeechEnd {
                interrupted: true,
                ..
            })) => println!("  (interrupted)"),
            Ok(RuntimeEvent::MicStatus { active: false }) => {
                println!("No audio from the microphone. Check input device and permissions.");
            }
            Ok(RuntimeEvent::SessionError { message, .. }) => println!("  error: {message}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalSink::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn print_config(config: &SpeechConfig) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
