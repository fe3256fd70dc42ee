pub mod decoder;
pub mod frame;
pub mod probe;

pub use decoder::FfmpegSource;
pub use frame::{Frame, FrameItem};
pub use probe::VideoInfo;
