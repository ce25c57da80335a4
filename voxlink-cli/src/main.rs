//! `voxlink`: command-line host for the voxlink engine.
//!
//! ```text
//! voxlink devices            list input/output devices
//! voxlink record -o out.wav  capture the microphone, write gated audio
//! voxlink replay in.wav      run the capture pipeline over a WAV file
//! voxlink live               talk to a voice agent over TCP
//! voxlink settings           show (or reset) the settings file
//! ```

mod commands;
mod settings;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use settings::{default_settings_path, load_settings};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "voxlink", version, about = "Live voice streaming for voice agents")]
struct Cli {
    /// Settings file (defaults to the user data directory).
    #[arg(long, global = true, env = "VOXLINK_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List audio devices.
    Devices {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Capture from the microphone and write emitted audio to a WAV file.
    Record(RecordArgs),
    /// Run the capture pipeline over a WAV file instead of a device.
    Replay(ReplayArgs),
    /// Stream to a voice agent and play its replies.
    Live(LiveArgs),
    /// Print the effective settings.
    Settings {
        /// Overwrite the settings file with defaults.
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Input device name.
    #[arg(long)]
    pub device: Option<String>,
    /// Energy VAD threshold (RMS).
    #[arg(long)]
    pub vad_threshold: Option<f32>,
    /// Emit fixed-size payloads of this many samples.
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Use the neural VAD.
    #[arg(long)]
    pub neural_vad: bool,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Output WAV path.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Stop after this many seconds (otherwise Ctrl-C).
    #[arg(long)]
    pub seconds: Option<f64>,
    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Input WAV file.
    pub input: PathBuf,
    /// Write the gated output here.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Feed samples at device speed instead of as fast as possible.
    #[arg(long)]
    pub realtime: bool,
    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Agent address (host:port).
    #[arg(long, env = "VOXLINK_SERVER")]
    pub server: Option<String>,
    /// Echo locally instead of connecting anywhere.
    #[arg(long)]
    pub loopback: bool,
    /// Output device name.
    #[arg(long)]
    pub output_device: Option<String>,
    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxlink=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    info!(
        settings_path = %settings_path.display(),
        server = %settings.server_addr,
        vad = ?settings.engine.vad,
        "settings loaded"
    );

    match cli.command {
        Command::Devices { json } => commands::devices(json),
        Command::Record(args) => commands::record(&settings, args).await,
        Command::Replay(args) => commands::replay(&settings, args).await,
        Command::Live(args) => commands::live(&settings, args).await,
        Command::Settings { reset } => commands::show_settings(&settings_path, settings, reset),
    }
}
