pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod probe;
pub mod tools;

pub use decoder::VideoDecoder;
pub use encoder::VideoEncoder;
pub use frame::Frame;
pub use probe::{count_frames, probe, VideoInfo};
pub use tools::FfmpegTools;
