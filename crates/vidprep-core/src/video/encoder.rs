use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::tools::{FfmpegTools, StderrDrain};

/// Codec used when the caller does not pick one. Matches the MPEG-4 Part 2
/// ("mp4v") streams the dataset was originally written with.
pub const DEFAULT_CODEC: &str = "mpeg4";

/// Encodes frames by piping raw RGB24 data into the ffmpeg CLI.
///
/// ffmpeg writes to a hidden `.partial-` sibling of the output path, which is
/// renamed into place by [`VideoEncoder::finish`]. Dropping an unfinished
/// encoder kills ffmpeg and removes the partial file, so the output path only
/// ever holds a complete video.
pub struct VideoEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: StderrDrain,
    path: PathBuf,
    partial: PathBuf,
    width: u32,
    height: u32,
    frames_written: u32,
}

impl VideoEncoder {
    /// Start encoding a `width`x`height` video at `fps` into `path`, overwriting it.
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
        codec: &str,
        tools: &FfmpegTools,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("invalid output dimensions: {width}x{height}");
        }
        if fps.is_nan() || fps <= 0.0 {
            bail!("output fps must be > 0, got {fps}");
        }
        let Some(file_name) = path.file_name() else {
            bail!("output path has no file name: {}", path.display());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        // Same extension as the final name so ffmpeg picks the same container.
        let mut partial_name = OsString::from(".partial-");
        partial_name.push(file_name);
        let partial = path.with_file_name(partial_name);

        info!(?path, width, height, fps, codec, "spawning ffmpeg encoder process");

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-y", "-v", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &fps.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", codec, "-pix_fmt", "yuv420p"])
            .arg(&partial)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg, is ffmpeg installed?")?;

        let stdin = child.stdin.take().context("ffmpeg stdin not available")?;
        let stderr = StderrDrain::spawn(&mut child);

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            path: path.to_path_buf(),
            partial,
            width,
            height,
            frames_written: 0,
        })
    }

    /// Append one frame. The frame must match the encoder's dimensions.
    pub fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height,
            );
        }

        let stdin = self.stdin.as_mut().context("ffmpeg stdin already closed")?;
        if let Err(e) = stdin.write_all(image.as_raw()) {
            error!(frame = self.frames_written, path = ?self.path, %e, "failed to write to ffmpeg pipe");
            return Err(e).context("failed to write frame to ffmpeg pipe");
        }

        debug!(frame = self.frames_written, "encoded frame");
        self.frames_written += 1;
        Ok(())
    }

    /// Close the input pipe, wait for ffmpeg to finish writing and move the
    /// file to its final path, which is returned.
    pub fn finish(mut self) -> Result<PathBuf> {
        drop(self.stdin.take());
        let mut child = self.child.take().context("ffmpeg process already reaped")?;

        let status = child.wait().context("failed to wait for ffmpeg encoder")?;
        let stderr = self.stderr.collect();
        if !status.success() {
            error!(%status, %stderr, path = ?self.path, "ffmpeg encoder failed");
            self.remove_partial();
            bail!("ffmpeg encoder failed for {}: {stderr}", self.path.display());
        }

        if let Err(e) = std::fs::rename(&self.partial, &self.path) {
            self.remove_partial();
            return Err(e).with_context(|| format!("failed to move encoded video to {}", self.path.display()));
        }

        info!(path = ?self.path, frames = self.frames_written, "video written");
        Ok(self.path.clone())
    }

    fn remove_partial(&self) {
        match std::fs::remove_file(&self.partial) {
            Ok(()) => debug!(partial = ?self.partial, "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(partial = ?self.partial, %e, "failed to remove partial output"),
        }
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!(path = ?self.path, frames = self.frames_written, "encoder dropped before finish, killing ffmpeg");
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
            self.remove_partial();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::video::tools::fake::FakeVideo;
    use image::Rgb;
    use tracing_test::traced_test;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vidprep-encoder-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn finished_video_lands_at_final_path() {
        let dir = scratch_dir("ok");
        let tools = FakeVideo::frames(3, 2, 0).install(&dir.join("bin"));
        let out_dir = dir.join("out");
        let path = out_dir.join("clip.mp4");

        let mut encoder = VideoEncoder::create(&path, 3, 2, 35.0, DEFAULT_CODEC, &tools).unwrap();
        for v in [10, 20, 30, 40] {
            encoder.write_frame(&RgbImage::from_pixel(3, 2, Rgb([v, v, v]))).unwrap();
        }
        assert_eq!(encoder.finish().unwrap(), path);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * 3 * 2 * 3);
        assert_eq!(file_names(&out_dir), vec!["clip.mp4"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_frame_of_wrong_size() {
        let dir = scratch_dir("size");
        let tools = FakeVideo::frames(4, 4, 0).install(&dir.join("bin"));
        let path = dir.join("out/clip.mp4");

        let mut encoder = VideoEncoder::create(&path, 4, 4, 35.0, DEFAULT_CODEC, &tools).unwrap();
        let err = encoder.write_frame(&RgbImage::new(4, 3)).unwrap_err();
        assert!(err.to_string().contains("encoder expects 4x4"), "{err}");

        // Still usable after the rejection.
        encoder.write_frame(&RgbImage::new(4, 4)).unwrap();
        encoder.finish().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * 4 * 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[traced_test]
    fn failed_exit_surfaces_stderr_and_leaves_nothing() {
        let dir = scratch_dir("fail");
        let tools = FakeVideo {
            encode_failure: Some(("*", "unknown encoder mpeg5")),
            ..FakeVideo::frames(2, 2, 0)
        }
        .install(&dir.join("bin"));
        let out_dir = dir.join("out");

        let mut encoder =
            VideoEncoder::create(&out_dir.join("clip.mp4"), 2, 2, 35.0, "mpeg5", &tools).unwrap();
        encoder.write_frame(&RgbImage::new(2, 2)).unwrap();
        let err = encoder.finish().unwrap_err();

        assert!(err.to_string().contains("unknown encoder mpeg5"), "{err}");
        assert!(logs_contain("ffmpeg encoder failed"));
        assert!(file_names(&out_dir).is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[traced_test]
    fn dropped_encoder_removes_partial_output() {
        let dir = scratch_dir("drop");
        let tools = FakeVideo::frames(2, 2, 0).install(&dir.join("bin"));
        let out_dir = dir.join("out");

        let mut encoder =
            VideoEncoder::create(&out_dir.join("clip.mp4"), 2, 2, 35.0, DEFAULT_CODEC, &tools).unwrap();
        encoder.write_frame(&RgbImage::new(2, 2)).unwrap();
        drop(encoder);

        assert!(logs_contain("encoder dropped before finish"));
        assert!(file_names(&out_dir).is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_invalid_settings() {
        let tools = FfmpegTools::default();
        let path = Path::new("unused.mp4");
        assert!(VideoEncoder::create(path, 0, 2, 35.0, DEFAULT_CODEC, &tools).is_err());
        assert!(VideoEncoder::create(path, 2, 2, 0.0, DEFAULT_CODEC, &tools).is_err());
        assert!(VideoEncoder::create(path, 2, 2, f64::NAN, DEFAULT_CODEC, &tools).is_err());
    }
}
