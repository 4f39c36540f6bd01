use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vidprep_core::pipeline::{DEFAULT_OUTPUT_FPS, DEFAULT_TARGET_COUNT};
use vidprep_core::video::encoder::DEFAULT_CODEC;

#[derive(Parser)]
#[command(name = "vidprep", about = "Video dataset preparation tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// ffmpeg executable used to decode and encode.
    #[arg(long, global = true, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe executable used to read video metadata.
    #[arg(long, global = true, default_value = "ffprobe")]
    pub ffprobe: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resample every video in a directory tree to a fixed frame count.
    Resample {
        /// Directory to scan recursively for videos.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write resampled videos to, mirroring the input layout.
        #[arg(short, long)]
        output: PathBuf,

        /// Number of frames in every output video.
        #[arg(short, long, default_value_t = DEFAULT_TARGET_COUNT)]
        target_count: usize,

        /// Frame rate of the output videos.
        #[arg(long, default_value_t = DEFAULT_OUTPUT_FPS)]
        fps: f64,

        /// Prefix added to each output file name.
        #[arg(long, default_value = "")]
        prefix: String,

        /// ffmpeg video codec for the output.
        #[arg(long, default_value = DEFAULT_CODEC)]
        codec: String,
    },

    /// Write flipped, rotated and brightened copies of every video.
    Augment {
        /// Directory to scan recursively for videos.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write augmented videos to, mirroring the input layout.
        #[arg(short, long)]
        output: PathBuf,

        /// Seed for the rotation angles (random if omitted).
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum rotation in degrees, either direction.
        #[arg(long, default_value_t = 15.0)]
        max_rotation: f32,

        /// ffmpeg video codec for the output.
        #[arg(long, default_value = DEFAULT_CODEC)]
        codec: String,
    },

    /// Count frames per video and export a CSV table and distribution chart.
    Count {
        /// Directory to scan recursively for videos.
        #[arg(short, long)]
        input: PathBuf,

        /// CSV output path (default: <input dir name>.csv).
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Chart output path (default: <input dir name>.png).
        #[arg(long)]
        plot: Option<PathBuf>,

        /// Skip the distribution chart.
        #[arg(long, conflicts_with = "plot")]
        no_plot: bool,

        /// TTF font for chart labels.
        #[arg(long)]
        font: Option<PathBuf>,
    },
}
