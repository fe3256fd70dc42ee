//! Video metadata probe via ffprobe
//!
//! Invoked once, synchronously, before any network activity. Only the
//! first video stream's frame rate and the container duration matter.

use std::path::Path;
use std::process::Command;

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tracing::info;

/// Frame rate and duration reported by the probe
#[derive(Debug, Clone, Copy)]
pub struct VideoInfo {
    pub fps: f64,
    /// Seconds; 0.0 means the container reports no duration.
    pub duration: f64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    r_frame_rate: String,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Run ffprobe against `path` and extract fps and duration.
pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .output()
        .map_err(|e| eyre!("failed to run ffprobe: {e}"))?;

    let info = parse_probe_output(&output.stdout)?;
    info!(fps = info.fps, duration = info.duration, "probed video");
    Ok(info)
}

/// Parse the JSON ffprobe writes to stdout.
pub fn parse_probe_output(raw: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput =
        serde_json::from_slice(raw).map_err(|e| eyre!("malformed probe output: {e}"))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| eyre!("no video stream found"))?;
    let fps = parse_rational(&stream.r_frame_rate)?;

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo { fps, duration })
}

/// Reduce a frame-rate rational like "30000/1001" to an f64.
fn parse_rational(rate: &str) -> Result<f64> {
    let (num, den) = rate
        .split_once('/')
        .ok_or_else(|| eyre!("malformed frame rate {rate:?}"))?;
    let num: f64 = num
        .parse()
        .map_err(|_| eyre!("malformed frame rate {rate:?}"))?;
    let den: f64 = den
        .parse()
        .map_err(|_| eyre!("malformed frame rate {rate:?}"))?;

    if den == 0.0 || num <= 0.0 {
        return Err(eyre!("invalid frame rate {rate:?}"));
    }
    Ok(num / den)
}
