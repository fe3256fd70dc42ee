//! Session controller and frame pacer
//!
//! Drives one run: connect once, then one or more playback passes. Each
//! pass prefills a fresh buffer from a fresh decoder before steady-state
//! paced sending begins. Cancellation is a single shared flag observed
//! at every loop head; there is no forced preemption mid-send.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::info;

use crate::net::{FrameSink, NetError, WsTransport};
use crate::pipeline::{FrameBuffer, FrameReader};
use crate::source::{FfmpegSource, FrameItem, VideoInfo};
use crate::status::{self, StatusSnapshot};
use crate::StreamConfig;

/// Poll cadence while waiting for the prefill target.
const PREFILL_POLL: Duration = Duration::from_millis(50);
/// Yield when the steady-state loop finds the buffer empty.
const EMPTY_RETRY: Duration = Duration::from_millis(1);

/// Where a run currently is; shown verbatim in the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Buffering,
    Streaming,
    Done,
    Cancelled,
    ConnectionRefused,
    ConnectionFailed,
    ConnectionClosed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamState::Connecting => "Connecting",
            StreamState::Buffering => "Buffering",
            StreamState::Streaming => "Streaming",
            StreamState::Done => "Done",
            StreamState::Cancelled => "Cancelled",
            StreamState::ConnectionRefused => "Connection refused",
            StreamState::ConnectionFailed => "Connection failed",
            StreamState::ConnectionClosed => "Connection closed",
        };
        f.write_str(label)
    }
}

/// Shared cancellation flag, passed by handle into every loop that must
/// observe it: the producer thread, prefill, steady state, and the
/// pass-repeat loop.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run-wide counters. Monotonic across loop passes: neither the frame
/// count nor the start time resets when playback restarts.
pub struct StreamStats {
    started: Instant,
    frames_sent: u64,
    actual_fps: f64,
}

impl StreamStats {
    fn new() -> Self {
        Self::started_at(Instant::now())
    }

    fn started_at(started: Instant) -> Self {
        Self {
            started,
            frames_sent: 0,
            actual_fps: 0.0,
        }
    }

    /// Record one send that began at `at` and recompute the actual rate
    /// against the run-wide start time.
    fn record_send(&mut self, at: Instant) {
        self.frames_sent += 1;
        let elapsed = at.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            self.actual_fps = self.frames_sent as f64 / elapsed;
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn actual_fps(&self) -> f64 {
        self.actual_fps
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Computes the post-send sleep that holds the target cadence.
struct Pacer {
    interval: Duration,
}

impl Pacer {
    /// `max(0, interval - send_spent)`: fast sends wait out the rest of
    /// the interval, slow sends fall behind gracefully. No frames are
    /// dropped to catch up.
    fn delay_after(&self, send_spent: Duration) -> Duration {
        self.interval.saturating_sub(send_spent)
    }
}

/// One streaming run against one connection.
pub struct Session {
    config: StreamConfig,
    info: VideoInfo,
    fps: f64,
    pacer: Pacer,
    cancel: CancelToken,
    stats: StreamStats,
    state: StreamState,
}

impl Session {
    pub fn new(config: StreamConfig, info: VideoInfo, cancel: CancelToken) -> Self {
        let fps = config.effective_fps(info.fps);
        Self {
            pacer: Pacer {
                interval: StreamConfig::frame_interval(fps),
            },
            config,
            info,
            fps,
            cancel,
            stats: StreamStats::new(),
            state: StreamState::Connecting,
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// One full run: connect once, stream passes, tear down.
    pub async fn run(&mut self) -> Result<()> {
        self.publish(StreamState::Connecting, 0);

        let mut sink = match WsTransport::connect(&self.config.url, self.config.frame_size()).await
        {
            Ok(sink) => sink,
            Err(e) => {
                self.publish(Self::connect_failure_state(&e), 0);
                return Err(e.into());
            }
        };

        let outcome = self.stream_passes(&mut sink).await;
        let _ = sink.close().await;

        match outcome {
            Ok(()) => {
                let state = if self.cancel.is_cancelled() {
                    StreamState::Cancelled
                } else {
                    StreamState::Done
                };
                self.publish(state, 0);
                Ok(())
            }
            Err(e) => {
                if e.downcast_ref::<NetError>().is_some() {
                    self.publish(StreamState::ConnectionClosed, 0);
                }
                Err(e)
            }
        }
    }

    /// The pass-repeat loop. Every pass gets a fresh decoder and buffer;
    /// the connection and the run-wide stats are shared across passes.
    async fn stream_passes<S: FrameSink>(&mut self, sink: &mut S) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let (writer, reader) = FrameBuffer::bounded(self.config.buffer_frames);
            let source = FfmpegSource::spawn(
                &self.config.video,
                self.config.size,
                self.config.frame_size(),
                writer,
            )?;

            self.prefill(&reader).await;
            let pass = self.streaming(&mut *sink, &reader).await;

            // The reader drops before the join so a producer blocked on
            // a full buffer unblocks via disconnect.
            drop(reader);
            source.shutdown();
            pass?;

            if !self.config.loop_playback || self.cancel.is_cancelled() {
                break;
            }
            info!("looping: restarting playback");
        }
        Ok(())
    }

    /// Buffering phase: wait until the buffer reaches capacity, the
    /// producer finishes early (video shorter than the buffer), or the
    /// run is cancelled.
    async fn prefill(&mut self, frames: &FrameReader) {
        self.publish(StreamState::Buffering, frames.fill());
        while frames.fill() < self.config.buffer_frames
            && !frames.producer_finished()
            && !self.cancel.is_cancelled()
        {
            tokio::time::sleep(PREFILL_POLL).await;
            self.publish(StreamState::Buffering, frames.fill());
        }
    }

    /// Steady state: pop, send, pace, until the sentinel or cancellation.
    async fn streaming<S: FrameSink>(
        &mut self,
        sink: &mut S,
        frames: &FrameReader,
    ) -> Result<(), NetError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let frame = match frames.try_recv() {
                Ok(FrameItem::Frame(frame)) => frame,
                Ok(FrameItem::EndOfStream) | Err(flume::TryRecvError::Disconnected) => {
                    return Ok(())
                }
                Err(flume::TryRecvError::Empty) => {
                    tokio::time::sleep(EMPTY_RETRY).await;
                    continue;
                }
            };

            let send_started = Instant::now();
            sink.send_frame(frame.data).await?;
            self.stats.record_send(send_started);
            self.publish(StreamState::Streaming, frames.fill());

            let delay = self.pacer.delay_after(send_started.elapsed());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Terminal state for a connect-phase failure. Only an actual
    /// refusal is labelled as one; DNS and handshake errors get the
    /// generic label.
    fn connect_failure_state(err: &NetError) -> StreamState {
        match err {
            NetError::Refused(_) => StreamState::ConnectionRefused,
            NetError::Handshake(_) | NetError::Closed(_) => StreamState::ConnectionFailed,
        }
    }

    fn publish(&mut self, state: StreamState, buffer_fill: usize) {
        self.state = state;
        status::publish(StatusSnapshot {
            source: self.config.video.display().to_string(),
            target: self.config.url.clone(),
            state,
            target_fps: self.fps,
            actual_fps: self.stats.actual_fps(),
            frames_sent: self.stats.frames_sent(),
            buffer_fill,
            buffer_capacity: self.config.buffer_frames,
            elapsed: self.stats.elapsed(),
            duration: self.info.duration,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrameWriter;
    use crate::source::Frame;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_tungstenite::tungstenite::Error as WsError;

    struct MockSink {
        sent: Vec<Bytes>,
        fail_after: Option<usize>,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_frame(&mut self, data: Bytes) -> Result<(), NetError> {
            if let Some(limit) = self.fail_after {
                if self.sent.len() >= limit {
                    return Err(NetError::Closed(WsError::ConnectionClosed));
                }
            }
            self.sent.push(data);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), NetError> {
            Ok(())
        }
    }

    fn test_session(buffer_frames: usize) -> Session {
        let config = StreamConfig {
            buffer_frames,
            ..Default::default()
        };
        let info = VideoInfo {
            fps: 30.0,
            duration: 0.0,
        };
        Session::new(config, info, CancelToken::new())
    }

    fn queue_frames(writer: FrameWriter, count: u64) {
        let stop = AtomicBool::new(false);
        for sequence in 0..count {
            let frame = Frame {
                data: Bytes::from(vec![sequence as u8; 3]),
                sequence,
            };
            assert!(writer.push(FrameItem::Frame(frame), &stop));
        }
        writer.finish();
    }

    #[test]
    fn pacer_never_sleeps_negative() {
        let pacer = Pacer {
            interval: Duration::from_millis(33),
        };
        assert_eq!(pacer.delay_after(Duration::from_millis(50)), Duration::ZERO);
        assert_eq!(
            pacer.delay_after(Duration::from_millis(10)),
            Duration::from_millis(23)
        );
    }

    #[test]
    fn stats_are_monotonic_and_run_wide() {
        let t0 = Instant::now();
        let mut stats = StreamStats::started_at(t0);

        for _ in 0..30 {
            stats.record_send(t0 + Duration::from_secs(1));
        }
        assert_eq!(stats.frames_sent(), 30);
        assert!((stats.actual_fps() - 30.0).abs() < 1e-9);

        // A later pass keeps counting against the same start time.
        for _ in 0..30 {
            stats.record_send(t0 + Duration::from_secs(3));
        }
        assert_eq!(stats.frames_sent(), 60);
        assert!((stats.actual_fps() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn failure_states_display_clearly() {
        assert_eq!(StreamState::ConnectionRefused.to_string(), "Connection refused");
        assert_eq!(StreamState::ConnectionFailed.to_string(), "Connection failed");
        assert_eq!(StreamState::ConnectionClosed.to_string(), "Connection closed");
        assert_eq!(StreamState::Streaming.to_string(), "Streaming");
    }

    #[test]
    fn only_actual_refusal_reports_refused() {
        let refused = NetError::Refused(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ));
        assert_eq!(
            Session::connect_failure_state(&refused),
            StreamState::ConnectionRefused
        );

        let handshake = NetError::Handshake(WsError::Url(
            tokio_tungstenite::tungstenite::error::UrlError::EmptyHostName,
        ));
        assert_eq!(
            Session::connect_failure_state(&handshake),
            StreamState::ConnectionFailed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_sends_every_frame_in_order() {
        let mut session = test_session(8);
        let (writer, reader) = FrameBuffer::bounded(8);
        queue_frames(writer, 3);

        let mut sink = MockSink::new();
        session.streaming(&mut sink, &reader).await.unwrap();

        assert_eq!(session.stats().frames_sent(), 3);
        let payloads: Vec<u8> = sink.sent.iter().map(|d| d[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
        assert_eq!(session.state(), StreamState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_aborts_when_connection_closes() {
        let mut session = test_session(8);
        let (writer, reader) = FrameBuffer::bounded(8);
        queue_frames(writer, 3);

        let mut sink = MockSink::new();
        sink.fail_after = Some(1);
        let result = session.streaming(&mut sink, &reader).await;

        assert!(matches!(result, Err(NetError::Closed(_))));
        assert_eq!(sink.sent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_streaming_before_any_send() {
        let mut session = test_session(8);
        session.cancel.cancel();

        let (writer, reader) = FrameBuffer::bounded(8);
        queue_frames(writer, 3);

        let mut sink = MockSink::new();
        session.streaming(&mut sink, &reader).await.unwrap();
        assert!(sink.sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frame_counter_continues_across_passes() {
        let mut session = test_session(8);
        let mut sink = MockSink::new();

        for _ in 0..2 {
            let (writer, reader) = FrameBuffer::bounded(8);
            queue_frames(writer, 2);
            session.streaming(&mut sink, &reader).await.unwrap();
        }

        assert_eq!(session.stats().frames_sent(), 4);
        assert_eq!(sink.sent.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn prefill_completes_when_buffer_is_full() {
        let mut session = test_session(2);
        let (writer, reader) = FrameBuffer::bounded(2);
        let stop = AtomicBool::new(false);
        for sequence in 0..2 {
            let frame = Frame {
                data: Bytes::from_static(b"rgb"),
                sequence,
            };
            assert!(writer.push(FrameItem::Frame(frame), &stop));
        }

        session.prefill(&reader).await;
        assert_eq!(session.state(), StreamState::Buffering);
        assert_eq!(reader.fill(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prefill_ends_early_for_short_videos() {
        // Two frames against a 30-deep buffer: the producer's sentinel
        // must end prefill instead of hanging it.
        let mut session = test_session(30);
        let (writer, reader) = FrameBuffer::bounded(30);
        queue_frames(writer, 2);

        session.prefill(&reader).await;
        assert!(reader.producer_finished());
    }
}
