//! ffmpeg subprocess frame source
//!
//! Spawns ffmpeg decoding the video to raw RGB24 on its stdout and pumps
//! fixed-size frames into the buffer from a dedicated thread. The pipe
//! read is blocking I/O with no non-blocking equivalent, so it must live
//! on its own thread to keep it off the pacing path.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

use crate::pipeline::FrameWriter;
use crate::source::frame::{Frame, FrameItem};

/// Bound on subprocess reaping and thread join during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// One decoding pass: the ffmpeg child plus its reader thread.
pub struct FfmpegSource {
    child: Child,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl FfmpegSource {
    /// Spawn ffmpeg scaling `video` to `size`x`size` raw RGB24 frames and
    /// start the reader thread feeding `writer`. Spawn failure is fatal.
    pub fn spawn(
        video: &Path,
        size: u32,
        frame_size: usize,
        writer: FrameWriter,
    ) -> Result<Self> {
        let scale = format!("scale={size}:{size}");
        let mut child = Command::new("ffmpeg")
            .arg("-i")
            .arg(video)
            .args(["-vf", &scale, "-pix_fmt", "rgb24", "-f", "rawvideo", "-v", "quiet", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| eyre!("failed to spawn ffmpeg: {e}"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre!("ffmpeg stdout was not captured"))?;

        info!(video = %video.display(), size, "decoder started");

        let stop = Arc::new(AtomicBool::new(false));
        let reader = thread::spawn({
            let stop = stop.clone();
            move || pump_frames(stdout, frame_size, writer, &stop)
        });

        Ok(Self {
            child,
            reader: Some(reader),
            stop,
        })
    }

    /// Stop the reader, terminate ffmpeg, and reap both with bounded
    /// waits. Killing the child closes its stdout, which unblocks a
    /// reader parked in `read_exact`. A decoder that refuses to exit is
    /// logged, not escalated.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.child.kill();

        if !wait_with_timeout(&mut self.child, SHUTDOWN_TIMEOUT) {
            warn!("ffmpeg did not exit within {SHUTDOWN_TIMEOUT:?}");
        }

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("frame reader thread did not exit within {SHUTDOWN_TIMEOUT:?}");
            }
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return true,
            Ok(None) => {}
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Reader loop: fixed-size reads from the decoder's output stream.
///
/// A short read means end of stream; partial trailing bytes are
/// discarded, never forwarded. The sentinel is enqueued as the final
/// action no matter how the loop ends.
fn pump_frames<R: Read>(mut output: R, frame_size: usize, writer: FrameWriter, stop: &AtomicBool) {
    let mut sequence = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let mut buf = vec![0u8; frame_size];
        if output.read_exact(&mut buf).is_err() {
            break;
        }
        let frame = Frame {
            data: Bytes::from(buf),
            sequence,
        };
        if !writer.push(FrameItem::Frame(frame), stop) {
            break;
        }
        sequence += 1;
    }
    debug!(frames = sequence, "decoder stream ended");
    writer.finish();
}
