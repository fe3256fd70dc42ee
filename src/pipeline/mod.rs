pub mod buffer;

pub use buffer::{FrameBuffer, FrameReader, FrameWriter};
