//! Bounded SPSC frame buffer for the decode pipeline
//!
//! Connects the blocking decoder thread (producer) to the cooperative
//! pacer task (consumer). The producer blocks in short slices when the
//! buffer is full so it can observe a stop request; the consumer polls
//! non-blockingly. The end-of-stream sentinel travels through the same
//! queue as frames, so it is strictly ordered after the last real frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, SendTimeoutError, Sender, TryRecvError};

use crate::source::FrameItem;

/// How long one blocking put attempt lasts before rechecking the stop flag.
const PUT_SLICE: Duration = Duration::from_millis(50);

/// Fixed-capacity FIFO of frames, split into its two endpoints.
pub struct FrameBuffer;

impl FrameBuffer {
    pub fn bounded(capacity: usize) -> (FrameWriter, FrameReader) {
        let (tx, rx) = flume::bounded(capacity);
        let finished = Arc::new(AtomicBool::new(false));
        (
            FrameWriter {
                tx,
                finished: finished.clone(),
            },
            FrameReader { rx, finished },
        )
    }
}

/// Producer endpoint, owned by the decoder thread.
pub struct FrameWriter {
    tx: Sender<FrameItem>,
    finished: Arc<AtomicBool>,
}

impl FrameWriter {
    /// Blocking put. Waits in [`PUT_SLICE`] increments so a full buffer
    /// never hides a stop request. Returns false if the item was not
    /// enqueued (stop requested, or the reader is gone).
    pub fn push(&self, item: FrameItem, stop: &AtomicBool) -> bool {
        let mut item = item;
        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            match self.tx.send_timeout(item, PUT_SLICE) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => item = returned,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Enqueue the end-of-stream sentinel and mark the producer finished.
    ///
    /// This is always the producer's final action, whether it hit natural
    /// EOF or was stopped. It keeps trying past a full buffer; teardown
    /// drops the reader first, which unblocks this via disconnect.
    pub fn finish(self) {
        self.finished.store(true, Ordering::Release);
        let mut item = FrameItem::EndOfStream;
        loop {
            match self.tx.send_timeout(item, PUT_SLICE) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(returned)) => item = returned,
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

/// Consumer endpoint, polled by the pacer.
pub struct FrameReader {
    rx: Receiver<FrameItem>,
    finished: Arc<AtomicBool>,
}

impl FrameReader {
    /// Non-blocking pop.
    pub fn try_recv(&self) -> Result<FrameItem, TryRecvError> {
        self.rx.try_recv()
    }

    /// Current number of queued items (sentinel included).
    pub fn fill(&self) -> usize {
        self.rx.len()
    }

    /// True once the producer has enqueued (or given up on) its sentinel.
    /// Lets prefill stop waiting when the video is shorter than the buffer.
    pub fn producer_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
