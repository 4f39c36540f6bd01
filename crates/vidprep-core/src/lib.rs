pub mod augment;
pub mod discover;
pub mod frame_count;
pub mod pipeline;
pub mod plot;
pub mod resample;
pub mod video;
