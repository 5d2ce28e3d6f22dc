mod layout;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use streammerge_core::{
    logging, LocalTrack, MediaStream, MediaStreamTrack, MergerConfig, MergerSession, StreamId,
    VideoFrame,
};

use layout::{Layout, LayoutMode};

#[derive(Parser, Debug)]
#[command(name = "streammerge")]
#[command(about = "Compose synthetic video sources into a single stream", long_about = None)]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(long, env = "STREAMMERGE_CONFIG")]
    config: Option<String>,

    /// Number of tile sources
    #[arg(long, default_value = "4")]
    sources: usize,

    /// Tile width in pixels
    #[arg(long, default_value = "320")]
    tile_width: u32,

    /// Tile height in pixels
    #[arg(long, default_value = "240")]
    tile_height: u32,

    /// Tiles per row in grid mode
    #[arg(long, default_value = "2")]
    columns: u32,

    /// Layout mode (grid, centered)
    #[arg(long, value_enum, default_value = "grid")]
    layout: LayoutMode,

    /// Forward the audio of every tile into the output
    #[arg(long)]
    with_audio: bool,

    /// How long to run before stopping
    #[arg(long, default_value = "5")]
    duration_secs: u64,

    /// Override the configured frame rate
    #[arg(long, env = "STREAMMERGE_FRAME_RATE")]
    frame_rate: Option<u32>,

    /// Write the last composed frame as a binary PPM image
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn synthetic_stream(name: &str) -> Arc<MediaStream> {
    let video: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::video());
    let audio: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::audio());
    let stream = MediaStream::new(format!("{name}-{}", StreamId::generate()));
    stream.add_track(video);
    stream.add_track(audio);
    Arc::new(stream)
}

/// Binary PPM (P6); alpha is dropped
fn write_ppm(path: &Path, frame: &VideoFrame) -> Result<()> {
    let mut out = format!("P6\n{} {}\n255\n", frame.width, frame.height).into_bytes();
    out.reserve(frame.data.len() / 4 * 3);
    for px in frame.data.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = MergerConfig::load(args.config.as_deref())?;
    if let Some(frame_rate) = args.frame_rate {
        config.frame_rate = frame_rate;
    }

    config.ensure_valid()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(
        sources = args.sources,
        layout = ?args.layout,
        frame_rate = config.frame_rate,
        "StreamMerge starting..."
    );

    // 3. Register sources
    let session = MergerSession::with_defaults(&config);
    let layout = Layout::new(
        args.layout,
        args.sources,
        args.tile_width,
        args.tile_height,
        args.columns,
    );
    for (index, options) in layout.options(args.with_audio).into_iter().enumerate() {
        let name = if index == 0 && layout.has_background() {
            "background"
        } else {
            "tile"
        };
        session.add_source(synthetic_stream(name), options);
    }
    info!(
        sources = session.source_count(),
        audio_tracks = session.audio_track_count(),
        surface = %session.surface_size(),
        "Sources registered"
    );

    // 4. Start composing
    let output = session
        .start_with_channel()?
        .await
        .context("Session dropped before delivering output")?;
    info!(
        stream_id = %output.id(),
        video_tracks = output.video_tracks().len(),
        audio_tracks = output.audio_tracks().len(),
        "Output stream ready"
    );

    // 5. Run until the duration elapses or Ctrl-C
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("Run duration elapsed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    if let Some(path) = &args.dump {
        let frame = output
            .video_tracks()
            .first()
            .and_then(|track| track.latest_frame());
        match frame {
            Some(frame) => {
                write_ppm(path, &frame)?;
                info!(
                    path = %path.display(),
                    width = frame.width,
                    height = frame.height,
                    "Wrote composed frame"
                );
            }
            None => warn!("Output has no readable video track, nothing to dump"),
        }
    }

    // 6. Teardown
    session.stop();
    info!(stats = %serde_json::to_string(&session.stats())?, "Session finished");

    Ok(())
}
