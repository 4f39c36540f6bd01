use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::augment::{AugmentParams, Augmentation};
use crate::discover::{self, DEFAULT_EXTENSIONS};
use crate::frame_count::{self, FrameCountRecord};
use crate::plot::ChartRenderer;
use crate::resample::resample;
use crate::video::encoder::DEFAULT_CODEC;
use crate::video::{count_frames, FfmpegTools, VideoDecoder, VideoEncoder};

/// Output frame count when none is configured.
pub const DEFAULT_TARGET_COUNT: usize = 70;
/// Frame rate of resampled videos when none is configured.
pub const DEFAULT_OUTPUT_FPS: f64 = 35.0;

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Parameters for resampling every video in a directory tree.
#[derive(Debug, Clone)]
pub struct ResampleConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Exact number of frames in every output video.
    pub target_count: usize,
    /// Frame rate written to the output videos.
    pub output_fps: f64,
    /// Prepended to each output file name.
    pub name_prefix: String,
    pub codec: String,
    pub extensions: Vec<String>,
    pub tools: FfmpegTools,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            target_count: DEFAULT_TARGET_COUNT,
            output_fps: DEFAULT_OUTPUT_FPS,
            name_prefix: String::new(),
            codec: DEFAULT_CODEC.to_string(),
            extensions: default_extensions(),
            tools: FfmpegTools::default(),
        }
    }
}

/// Parameters for writing augmented copies of every video in a directory tree.
#[derive(Debug, Clone)]
pub struct AugmentConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Seed for the per-video rotation angle, or None for a random seed.
    pub seed: Option<u64>,
    /// Rotation is drawn from `[-max_rotation, max_rotation)` degrees.
    pub max_rotation: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub codec: String,
    pub extensions: Vec<String>,
    pub tools: FfmpegTools,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            seed: None,
            max_rotation: 15.0,
            contrast: 1.2,
            brightness: 15.0,
            codec: DEFAULT_CODEC.to_string(),
            extensions: default_extensions(),
            tools: FfmpegTools::default(),
        }
    }
}

/// Parameters for the frame-count report.
#[derive(Debug, Clone)]
pub struct CountConfig {
    pub input_dir: PathBuf,
    pub csv_path: PathBuf,
    /// Where to save the distribution chart, or None to skip it.
    pub plot_path: Option<PathBuf>,
    /// TTF font for chart text, or None to search common system fonts.
    pub font_path: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub tools: FfmpegTools,
}

impl CountConfig {
    /// Report named after the input directory (`<name>.csv`, `<name>.png`)
    /// in the working directory.
    pub fn for_input(input_dir: &Path) -> Self {
        let name = input_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "frame_counts".to_string());
        Self {
            input_dir: input_dir.to_path_buf(),
            csv_path: PathBuf::from(format!("{name}.csv")),
            plot_path: Some(PathBuf::from(format!("{name}.png"))),
            font_path: None,
            extensions: default_extensions(),
            tools: FfmpegTools::default(),
        }
    }
}

/// Outcome of a batch run. A failed video never aborts the batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    fn record(&mut self, video: &Path, result: Result<()>) {
        match result {
            Ok(()) => self.processed += 1,
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(?video, error = %reason, "video failed, skipping");
                self.failed.push((video.to_path_buf(), reason));
            }
        }
    }
}

/// Output names already taken in this batch, mapped to the video that took
/// them. Sources such as `a.avi` and `a.mp4` in one folder share an output
/// name; the first one wins and the others fail.
#[derive(Debug, Default)]
struct OutputClaims(HashMap<PathBuf, PathBuf>);

impl OutputClaims {
    fn claim(&mut self, output: &Path, video: &Path) -> Result<()> {
        if let Some(owner) = self.0.get(output) {
            bail!(
                "output {} collides with the output of {}",
                output.display(),
                owner.display(),
            );
        }
        self.0.insert(output.to_path_buf(), video.to_path_buf());
        Ok(())
    }
}

/// Resample every video under `input_dir` to `target_count` frames.
pub fn run_resample(config: &ResampleConfig) -> Result<BatchSummary> {
    if config.target_count < 1 {
        bail!("target_count must be >= 1, got {}", config.target_count);
    }
    if config.output_fps.is_nan() || config.output_fps <= 0.0 {
        bail!("output_fps must be > 0, got {}", config.output_fps);
    }

    info!(
        input = ?config.input_dir,
        output = ?config.output_dir,
        target_count = config.target_count,
        output_fps = config.output_fps,
        "resample batch starting"
    );

    discover::ensure_separate_trees(&config.input_dir, &config.output_dir)?;
    let videos = discover::find_videos(&config.input_dir, &config.extensions)?;
    let mut summary = BatchSummary::default();
    let mut claims = OutputClaims::default();

    for video in &videos {
        let out_dir = discover::mirror_dir(&config.input_dir, &config.output_dir, video);
        let name = format!("{}{}.mp4", config.name_prefix, discover::file_stem(video));
        let output = out_dir.join(name);

        info!(?video, ?output, "processing video");
        let result = claims
            .claim(&output, video)
            .and_then(|()| resample_video(video, &output, config));
        summary.record(video, result);
    }

    info!(
        processed = summary.processed,
        failed = summary.failed.len(),
        "resample batch complete"
    );
    Ok(summary)
}

fn resample_video(video: &Path, output: &Path, config: &ResampleConfig) -> Result<()> {
    let mut decoder = VideoDecoder::open(video, &config.tools).context("failed to open video")?;
    let frames = decoder.read_all().context("failed to decode video")?;
    drop(decoder);

    let original_count = frames.len();
    let images: Vec<RgbImage> = frames.into_iter().map(|f| f.image).collect();
    let resampled = resample(images, config.target_count).context("failed to resample frames")?;

    info!(original_count, output_count = resampled.len(), "frames resampled");

    // resample never returns an empty sequence.
    let (width, height) = resampled[0].dimensions();
    let mut encoder = VideoEncoder::create(
        output,
        width,
        height,
        config.output_fps,
        &config.codec,
        &config.tools,
    )?;
    for image in &resampled {
        encoder.write_frame(image)?;
    }
    encoder.finish()?;
    Ok(())
}

/// Write every flip/rotate/brightness combination of every video under `input_dir`.
pub fn run_augment(config: &AugmentConfig) -> Result<BatchSummary> {
    info!(
        input = ?config.input_dir,
        output = ?config.output_dir,
        seed = ?config.seed,
        "augment batch starting"
    );

    discover::ensure_separate_trees(&config.input_dir, &config.output_dir)?;
    let videos = discover::find_videos(&config.input_dir, &config.extensions)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut summary = BatchSummary::default();
    let mut claims = OutputClaims::default();

    for video in &videos {
        let out_dir = discover::mirror_dir(&config.input_dir, &config.output_dir, video);
        // Every combination shares the stem, so claiming the original's name covers all eight.
        let original = out_dir.join(format!("{}.mp4", discover::file_stem(video)));
        let params = AugmentParams::sample(
            &mut rng,
            config.max_rotation,
            config.contrast,
            config.brightness,
        );

        info!(?video, ?out_dir, rotate_degrees = params.rotate_degrees, "augmenting video");
        let result = claims
            .claim(&original, video)
            .and_then(|()| augment_video(video, &out_dir, &params, config));
        summary.record(video, result);
    }

    info!(
        processed = summary.processed,
        failed = summary.failed.len(),
        "augment batch complete"
    );
    Ok(summary)
}

fn augment_video(video: &Path, out_dir: &Path, params: &AugmentParams, config: &AugmentConfig) -> Result<()> {
    let mut decoder = VideoDecoder::open(video, &config.tools).context("failed to open video")?;
    let stem = discover::file_stem(video);

    let mut writers = Augmentation::all()
        .into_iter()
        .map(|aug| {
            let path = out_dir.join(aug.output_name(&stem));
            let encoder = VideoEncoder::create(
                &path,
                decoder.width(),
                decoder.height(),
                decoder.fps(),
                &config.codec,
                &config.tools,
            )?;
            Ok((aug, encoder))
        })
        .collect::<Result<Vec<_>>>()?;

    while let Some(frame) = decoder.next_frame()? {
        for (aug, encoder) in writers.iter_mut() {
            encoder.write_frame(&aug.apply(&frame.image, params))?;
        }
    }

    // All eight or none: a late failure takes the finished outputs with it.
    let mut written = Vec::with_capacity(writers.len());
    for (_, encoder) in writers {
        match encoder.finish() {
            Ok(path) => written.push(path),
            Err(e) => {
                for path in &written {
                    if let Err(remove) = std::fs::remove_file(path) {
                        warn!(?path, %remove, "failed to remove augmented output");
                    }
                }
                return Err(e);
            }
        }
    }
    info!(?video, outputs = written.len(), "augmented videos written");
    Ok(())
}

/// Count frames of every video under `input_dir`, write the CSV report and
/// optionally the distribution chart.
pub fn run_count(config: &CountConfig) -> Result<Vec<FrameCountRecord>> {
    info!(input = ?config.input_dir, csv = ?config.csv_path, "frame count starting");

    let videos = discover::find_videos(&config.input_dir, &config.extensions)?;
    let records = frame_count::collect(&videos, |video| count_frames(video, &config.tools));

    frame_count::write_csv(&records, &config.csv_path)?;

    if let Some(plot_path) = &config.plot_path {
        let bins = frame_count::distribution(&records);
        ChartRenderer::new(config.font_path.as_deref()).save(
            &bins,
            "Frame Count Distribution Across Videos",
            "Frame Count",
            "Videos",
            plot_path,
        )?;
    }

    info!(
        videos = videos.len(),
        counted = records.len(),
        "frame count complete"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vidprep-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rejects_invalid_resample_config() {
        let config = ResampleConfig {
            target_count: 0,
            ..Default::default()
        };
        assert!(run_resample(&config).is_err());

        let config = ResampleConfig {
            output_fps: 0.0,
            ..Default::default()
        };
        assert!(run_resample(&config).is_err());
    }

    #[test]
    fn missing_input_dir_aborts() {
        let config = ResampleConfig {
            input_dir: PathBuf::from("/nonexistent/vidprep/input"),
            ..Default::default()
        };
        assert!(run_resample(&config).is_err());
    }

    #[test]
    #[traced_test]
    fn unreadable_video_is_skipped_not_fatal() {
        let root = scratch_dir("skip");
        let input = root.join("in");
        std::fs::create_dir_all(input.join("class_a")).unwrap();
        std::fs::write(input.join("class_a/garbage.mp4"), b"not a video").unwrap();

        let config = ResampleConfig {
            input_dir: input,
            output_dir: root.join("out"),
            ..Default::default()
        };
        let summary = run_resample(&config).unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].0.ends_with("class_a/garbage.mp4"));
        assert!(logs_contain("video failed, skipping"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn count_on_empty_tree_writes_empty_report() {
        let root = scratch_dir("count");
        let input = root.join("dataset");
        std::fs::create_dir_all(&input).unwrap();

        let config = CountConfig {
            csv_path: root.join("dataset.csv"),
            plot_path: Some(root.join("dataset.png")),
            ..CountConfig::for_input(&input)
        };
        let records = run_count(&config).unwrap();

        assert!(records.is_empty());
        assert_eq!(
            std::fs::read_to_string(root.join("dataset.csv")).unwrap(),
            "Video Name,Frame Count\n"
        );
        assert!(root.join("dataset.png").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn output_inside_input_is_rejected() {
        let root = scratch_dir("nested");
        let input = root.join("in");
        std::fs::create_dir_all(&input).unwrap();

        let config = ResampleConfig {
            input_dir: input.clone(),
            output_dir: input.clone(),
            ..Default::default()
        };
        assert!(run_resample(&config).is_err());

        let config = AugmentConfig {
            input_dir: input.clone(),
            output_dir: input.join("augmented"),
            ..Default::default()
        };
        assert!(run_augment(&config).is_err());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn count_report_named_after_input() {
        let config = CountConfig::for_input(Path::new("data/Swimming Dataset"));
        assert_eq!(config.csv_path, PathBuf::from("Swimming Dataset.csv"));
        assert_eq!(config.plot_path, Some(PathBuf::from("Swimming Dataset.png")));
    }

    /// Runs against shell-script stand-ins for ffmpeg and ffprobe.
    #[cfg(unix)]
    mod with_fake_ffmpeg {
        use super::*;
        use crate::video::tools::fake::FakeVideo;

        /// Input tree with one empty file per relative path; the fake tools
        /// ignore file contents.
        fn dataset(root: &Path, videos: &[&str]) -> PathBuf {
            let input = root.join("in");
            for video in videos {
                let path = input.join(video);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, b"").unwrap();
            }
            input
        }

        /// Relative paths and sizes of every file under `dir`.
        fn outputs(dir: &Path) -> Vec<(String, u64)> {
            if !dir.exists() {
                return Vec::new();
            }
            let mut files: Vec<(String, u64)> = walkdir::WalkDir::new(dir)
                .into_iter()
                .map(|e| e.unwrap())
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                    (rel, e.metadata().unwrap().len())
                })
                .collect();
            files.sort();
            files
        }

        #[test]
        fn resampled_video_has_target_frame_count() {
            let root = scratch_dir("fake-resample");
            let fake = FakeVideo::frames(2, 2, 3);
            let frame_bytes = fake.frame_bytes() as u64;
            let input = dataset(&root, &["swim/clip.avi"]);

            let config = ResampleConfig {
                input_dir: input,
                output_dir: root.join("out"),
                target_count: 7,
                name_prefix: "r_".to_string(),
                tools: fake.install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_resample(&config).unwrap();

            assert_eq!(summary.processed, 1);
            assert!(summary.failed.is_empty());
            assert_eq!(
                outputs(&root.join("out")),
                vec![("swim/r_clip.mp4".to_string(), 7 * frame_bytes)]
            );

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        #[traced_test]
        fn decoder_crash_fails_the_video_without_output() {
            let root = scratch_dir("fake-crash");
            let input = dataset(&root, &["swim/clip.avi"]);

            let config = ResampleConfig {
                input_dir: input,
                output_dir: root.join("out"),
                tools: FakeVideo {
                    decode_tail: "echo 'decode error' >&2; exit 1",
                    ..FakeVideo::frames(2, 2, 2)
                }
                .install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_resample(&config).unwrap();

            assert_eq!(summary.processed, 0);
            assert_eq!(summary.failed.len(), 1);
            assert!(summary.failed[0].1.contains("decode error"), "{}", summary.failed[0].1);
            assert!(outputs(&root.join("out")).is_empty());
            assert!(logs_contain("video failed, skipping"));

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        fn colliding_stems_fail_the_later_video() {
            let root = scratch_dir("fake-collide");
            let fake = FakeVideo::frames(2, 2, 2);
            let frame_bytes = fake.frame_bytes() as u64;
            let input = dataset(&root, &["swim/a.avi", "swim/a.mp4", "swim/b.mp4"]);

            let config = ResampleConfig {
                input_dir: input,
                output_dir: root.join("out"),
                target_count: 2,
                tools: fake.install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_resample(&config).unwrap();

            assert_eq!(summary.processed, 2);
            assert_eq!(summary.failed.len(), 1);
            assert!(summary.failed[0].0.ends_with("swim/a.mp4"));
            assert!(summary.failed[0].1.contains("collides"), "{}", summary.failed[0].1);
            assert_eq!(
                outputs(&root.join("out")),
                vec![
                    ("swim/a.mp4".to_string(), 2 * frame_bytes),
                    ("swim/b.mp4".to_string(), 2 * frame_bytes),
                ]
            );

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        fn augment_writes_every_combination() {
            let root = scratch_dir("fake-augment");
            let fake = FakeVideo::frames(4, 4, 3);
            let frame_bytes = fake.frame_bytes() as u64;
            let input = dataset(&root, &["dive/v.mov"]);

            let config = AugmentConfig {
                input_dir: input,
                output_dir: root.join("out"),
                seed: Some(3),
                tools: fake.install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_augment(&config).unwrap();

            assert_eq!(summary.processed, 1);
            let mut expected: Vec<(String, u64)> = Augmentation::all()
                .iter()
                .map(|aug| (format!("dive/{}", aug.output_name("v")), 3 * frame_bytes))
                .collect();
            expected.sort();
            assert_eq!(outputs(&root.join("out")), expected);

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        #[traced_test]
        fn augment_failure_mid_frame_leaves_no_outputs() {
            let root = scratch_dir("fake-augment-fail");
            let input = dataset(&root, &["dive/v.mov"]);

            let config = AugmentConfig {
                input_dir: input,
                output_dir: root.join("out"),
                seed: Some(3),
                tools: FakeVideo {
                    decoded_bytes: 17,
                    decode_tail: "exit 1",
                    ..FakeVideo::frames(2, 2, 1)
                }
                .install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_augment(&config).unwrap();

            assert_eq!(summary.processed, 0);
            assert_eq!(summary.failed.len(), 1);
            assert!(outputs(&root.join("out")).is_empty());
            assert!(logs_contain("encoder dropped before finish"));

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        fn augment_encoder_failure_removes_finished_combinations() {
            let root = scratch_dir("fake-augment-encode");
            let input = dataset(&root, &["dive/v.mov"]);

            let config = AugmentConfig {
                input_dir: input,
                output_dir: root.join("out"),
                seed: Some(3),
                tools: FakeVideo {
                    encode_failure: Some(("*rotate*", "rotate failed")),
                    ..FakeVideo::frames(2, 2, 2)
                }
                .install(&root.join("bin")),
                ..Default::default()
            };
            let summary = run_augment(&config).unwrap();

            assert_eq!(summary.processed, 0);
            assert!(summary.failed[0].1.contains("rotate failed"), "{}", summary.failed[0].1);
            assert!(outputs(&root.join("out")).is_empty());

            std::fs::remove_dir_all(&root).unwrap();
        }

        #[test]
        fn count_reports_container_frame_counts() {
            let root = scratch_dir("fake-count");
            let input = dataset(&root, &["swim/a.mp4", "dive/b.mp4"]);

            let config = CountConfig {
                csv_path: root.join("report.csv"),
                plot_path: None,
                tools: FakeVideo::frames(2, 2, 5).install(&root.join("bin")),
                ..CountConfig::for_input(&input)
            };
            let records = run_count(&config).unwrap();

            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| r.frame_count == 5));
            assert_eq!(
                std::fs::read_to_string(root.join("report.csv")).unwrap(),
                "Video Name,Frame Count\nb.mp4,5\na.mp4,5\n"
            );

            std::fs::remove_dir_all(&root).unwrap();
        }
    }
}
