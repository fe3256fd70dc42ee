//! Live status view
//!
//! The pipeline publishes snapshots through an atomically swapped
//! global; a separate cooperative task renders the latest one as a
//! small table redrawn in place on stdout. Logs go to stderr, so the
//! table owns stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use once_cell::sync::Lazy;

use crate::session::StreamState;

/// Latest pipeline snapshot, swapped after every state change and send.
pub static STATUS: Lazy<ArcSwap<StatusSnapshot>> =
    Lazy::new(|| ArcSwap::from_pointee(StatusSnapshot::default()));

/// Table refresh cadence (4x per second).
const REFRESH: Duration = Duration::from_millis(250);

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub source: String,
    pub target: String,
    pub state: StreamState,
    pub target_fps: f64,
    pub actual_fps: f64,
    pub frames_sent: u64,
    pub buffer_fill: usize,
    pub buffer_capacity: usize,
    pub elapsed: Duration,
    /// Video duration in seconds; 0.0 means unknown and hides progress.
    pub duration: f64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            source: String::new(),
            target: String::new(),
            state: StreamState::Connecting,
            target_fps: 0.0,
            actual_fps: 0.0,
            frames_sent: 0,
            buffer_fill: 0,
            buffer_capacity: 0,
            elapsed: Duration::ZERO,
            duration: 0.0,
        }
    }
}

pub fn publish(snapshot: StatusSnapshot) {
    STATUS.store(Arc::new(snapshot));
}

/// Redraw the table every [`REFRESH`] until `done` is set, finishing
/// with one last draw so the final state stays on screen.
pub async fn render_loop(done: Arc<AtomicBool>) {
    let mut drawn_lines = 0u16;
    loop {
        drawn_lines = redraw(&STATUS.load(), drawn_lines);
        if done.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(REFRESH).await;
    }
}

fn redraw(snapshot: &StatusSnapshot, previous_lines: u16) -> u16 {
    let table = format_table(snapshot);
    let mut out = io::stdout();
    if previous_lines > 0 {
        let _ = execute!(
            out,
            cursor::MoveToPreviousLine(previous_lines),
            Clear(ClearType::FromCursorDown)
        );
    }
    let _ = out.write_all(table.as_bytes());
    let _ = out.flush();
    table.lines().count() as u16
}

/// Plain-text table body, one `key value` row per line.
pub fn format_table(s: &StatusSnapshot) -> String {
    let mut rows = vec![
        ("Source", s.source.clone()),
        ("Target", s.target.clone()),
        ("State", s.state.to_string()),
        (
            "FPS",
            format!("{:.1} / {:.1} target", s.actual_fps, s.target_fps),
        ),
        ("Frames", s.frames_sent.to_string()),
        ("Buffer", format!("{} / {}", s.buffer_fill, s.buffer_capacity)),
    ];

    if s.duration > 0.0 {
        let total_frames = (s.duration * s.target_fps) as u64;
        let progress = if total_frames > 0 {
            (s.frames_sent as f64 / total_frames as f64).min(1.0)
        } else {
            0.0
        };
        rows.push((
            "Progress",
            format!("{} {:.0}%", progress_bar(progress, BAR_WIDTH), progress * 100.0),
        ));

        let remaining = (s.duration - s.elapsed.as_secs_f64()).max(0.0);
        rows.push((
            "Time",
            format!(
                "{} / {} remaining",
                format_clock(s.elapsed),
                format_clock(Duration::from_secs_f64(remaining))
            ),
        ));
    } else {
        rows.push(("Time", format_clock(s.elapsed)));
    }

    let mut table = String::new();
    for (key, value) in rows {
        table.push_str(&format!("{key:<10} {value}\n"));
    }
    table
}

/// `m:ss` wall clock.
pub fn format_clock(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}

/// Fixed-width bar with the leading `fraction` filled.
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * width as f64) as usize;
    let mut bar = String::new();
    for i in 0..width {
        bar.push(if i < filled { '━' } else { '╌' });
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats_minutes_and_seconds() {
        assert_eq!(format_clock(Duration::from_secs(0)), "0:00");
        assert_eq!(format_clock(Duration::from_secs(65)), "1:05");
        assert_eq!(format_clock(Duration::from_secs(600)), "10:00");
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        let bar = progress_bar(0.5, 30);
        assert_eq!(bar.chars().count(), 30);
        assert_eq!(bar.chars().filter(|&c| c == '━').count(), 15);

        assert_eq!(progress_bar(2.0, 10).chars().filter(|&c| c == '━').count(), 10);
        assert_eq!(progress_bar(-1.0, 10).chars().filter(|&c| c == '━').count(), 0);
    }

    #[test]
    fn unknown_duration_hides_progress() {
        let snapshot = StatusSnapshot {
            state: StreamState::Streaming,
            duration: 0.0,
            ..Default::default()
        };
        let table = format_table(&snapshot);
        assert!(table.contains("Streaming"));
        assert!(!table.contains("Progress"));
        assert!(!table.contains("remaining"));
    }

    #[test]
    fn known_duration_shows_progress_and_remaining() {
        let snapshot = StatusSnapshot {
            state: StreamState::Streaming,
            target_fps: 30.0,
            frames_sent: 30,
            duration: 2.0,
            elapsed: Duration::from_secs(1),
            ..Default::default()
        };
        let table = format_table(&snapshot);
        assert!(table.contains("Progress"));
        assert!(table.contains("50%"));
        assert!(table.contains("0:01 / 0:01 remaining"));
    }
}
