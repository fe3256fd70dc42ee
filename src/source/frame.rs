use bytes::Bytes;

/// One decoded frame with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable raw RGB24 pixel data, exactly size*size*3 bytes
    pub data: Bytes,

    /// Decode order within the pass, starting at 0
    pub sequence: u64,
}

/// What flows through the frame buffer: a frame, or the end-of-stream
/// sentinel the producer enqueues exactly once as its final action.
pub enum FrameItem {
    Frame(Frame),
    EndOfStream,
}
