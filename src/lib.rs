pub mod net;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod status;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one streaming run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Path to the source video file
    pub video: PathBuf,
    /// WebSocket URL of the remote display
    pub url: String,
    /// Panel dimension in pixels per side
    pub size: u32,
    /// Override for the probed frame rate
    pub fps_override: Option<f64>,
    /// Frames to buffer ahead before streaming starts
    pub buffer_frames: usize,
    /// Restart playback from the first frame after EOF
    pub loop_playback: bool,
}

impl StreamConfig {
    /// Bytes per raw RGB24 frame: width * height * 3, no padding.
    pub fn frame_size(&self) -> usize {
        (self.size * self.size * 3) as usize
    }

    /// Target frame rate: the override if given, otherwise the probed rate.
    pub fn effective_fps(&self, probed: f64) -> f64 {
        self.fps_override.unwrap_or(probed)
    }

    /// Time between consecutive sends at `fps`.
    pub fn frame_interval(fps: f64) -> Duration {
        Duration::from_secs_f64(1.0 / fps)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            video: PathBuf::new(),
            url: String::new(),
            size: 64,
            fps_override: None,
            buffer_frames: 30,
            loop_playback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_rgb24() {
        let config = StreamConfig {
            size: 64,
            ..Default::default()
        };
        assert_eq!(config.frame_size(), 64 * 64 * 3);

        let small = StreamConfig {
            size: 32,
            ..Default::default()
        };
        assert_eq!(small.frame_size(), 3072);
    }

    #[test]
    fn fps_override_wins() {
        let config = StreamConfig {
            fps_override: Some(15.0),
            ..Default::default()
        };
        assert_eq!(config.effective_fps(30.0), 15.0);

        let config = StreamConfig::default();
        assert_eq!(config.effective_fps(30.0), 30.0);
    }

    #[test]
    fn frame_interval_at_30fps() {
        let interval = StreamConfig::frame_interval(30.0);
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }
}
