//! framecast: stream a video file to a remote display over WebSocket

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use framecast::session::{CancelToken, Session};
use framecast::source::probe;
use framecast::status;
use framecast::StreamConfig;

/// Stream video to an LED matrix display over WebSocket
#[derive(Parser, Debug)]
#[command(name = "framecast", version, about)]
struct Cli {
    /// Path to the video file
    video: PathBuf,

    /// WebSocket URL, e.g. ws://pi:8080/api/v1/display/stream
    url: String,

    /// Panel dimension (pixels per side)
    #[arg(long, default_value_t = 64)]
    size: u32,

    /// Override the probed video fps
    #[arg(long)]
    fps: Option<f64>,

    /// Number of frames to buffer ahead
    #[arg(long, default_value_t = 30)]
    buffer: usize,

    /// Loop video playback
    #[arg(long = "loop")]
    loop_playback: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("framecast=info")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if !cli.video.exists() {
        return Err(eyre!("file not found: {}", cli.video.display()));
    }

    let video_info = probe::probe_video(&cli.video)?;

    let config = StreamConfig {
        video: cli.video,
        url: cli.url,
        size: cli.size,
        fps_override: cli.fps,
        buffer_frames: cli.buffer,
        loop_playback: cli.loop_playback,
    };
    let fps = config.effective_fps(video_info.fps);
    if fps <= 0.0 {
        return Err(eyre!("invalid target fps: {fps}"));
    }

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });

    let done = Arc::new(AtomicBool::new(false));
    let renderer = tokio::spawn(status::render_loop(done.clone()));

    let mut session = Session::new(config, video_info, cancel);
    let outcome = session.run().await;

    done.store(true, Ordering::Relaxed);
    let _ = renderer.await;

    let stats = session.stats();
    info!(
        "{} frames in {:.1}s ({:.1} fps)",
        stats.frames_sent(),
        stats.elapsed().as_secs_f64(),
        stats.actual_fps()
    );

    outcome
}
