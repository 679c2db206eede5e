//! Headless playback smoke test.
//!
//! Opens a media file against the software renderer, plays it for a few
//! seconds, and reports what happened. Useful for checking codec and
//! hardware-acceleration behavior on a cabinet without bringing up the
//! full frontend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pincab_media::{
    create_player, detect_hw_accel, BackendKind, Renderer, SoftwareRenderer,
};

/// Headless media playback smoke test for pincab-media
#[derive(Parser, Debug)]
#[command(name = "pincab-preview")]
#[command(about = "Decode a media file headlessly and report playback stats")]
#[command(version)]
struct Args {
    /// Media file to play
    path: PathBuf,

    /// Output texture width
    #[arg(long, default_value = "640")]
    width: u32,

    /// Output texture height
    #[arg(long, default_value = "360")]
    height: u32,

    /// Seconds to keep playing
    #[arg(long, default_value = "5")]
    seconds: u64,

    /// Playback backend (ffmpeg, null)
    #[arg(long, default_value = "ffmpeg")]
    backend: String,

    /// Volume (0-100)
    #[arg(long, default_value = "80")]
    volume: f32,

    /// Mute audio output
    #[arg(long)]
    mute: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let backend = match args.backend.to_lowercase().as_str() {
        "null" | "novideo" => BackendKind::Null,
        _ => BackendKind::Ffmpeg,
    };

    info!("Hardware acceleration available: {:?}", detect_hw_accel());

    let renderer: Arc<dyn Renderer> = Arc::new(SoftwareRenderer::new());
    let mut player = create_player(backend);
    if !player.setup(Arc::clone(&renderer), &args.path, args.width, args.height) {
        anyhow::bail!("Failed to set up playback for {}", args.path.display());
    }
    player.set_volume(args.volume);
    player.set_mute(args.mute);
    player.play();

    // Pump at roughly display rate, the way a frontend would.
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.seconds);
    let mut ticks: u64 = 0;
    while Instant::now() < deadline {
        player.update();
        ticks += 1;
        std::thread::sleep(Duration::from_millis(16));
    }
    player.stop();

    info!(
        "Played {} for {:.1}s ({} update ticks), still playing: {}",
        args.path.display(),
        started.elapsed().as_secs_f64(),
        ticks,
        player.is_playing()
    );
    Ok(())
}
