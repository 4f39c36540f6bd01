use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info};

use super::frame::Frame;
use super::probe::{probe, VideoInfo};
use super::tools::{FfmpegTools, StderrDrain};

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// The stream only counts as complete once ffmpeg has exited successfully;
/// a decode that dies early is an error even when it stops on a frame
/// boundary.
pub struct VideoDecoder {
    child: Child,
    stderr: StderrDrain,
    info: VideoInfo,
    frame_count: u32,
    frame_bytes: usize,
    finished: bool,
}

impl VideoDecoder {
    /// Open a video file for decoding.
    pub fn open(path: &Path, tools: &FfmpegTools) -> Result<Self> {
        if !path.exists() {
            bail!("video file does not exist: {}", path.display());
        }

        let info = probe(path, tools)?;
        if info.width == 0 || info.height == 0 {
            bail!("invalid video dimensions: {}x{}", info.width, info.height);
        }

        info!(?path, "spawning ffmpeg decoder process");

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-i"])
            .arg(path)
            .args([
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-v", "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg, is ffmpeg installed?")?;
        let stderr = StderrDrain::spawn(&mut child);

        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;

        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            stderr,
            info,
            frame_count: 0,
            frame_bytes,
            finished: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn fps(&self) -> f64 {
        self.info.fps
    }

    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let stdout = self
            .child
            .stdout
            .as_mut()
            .context("ffmpeg stdout not available")?;

        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;

        while read < self.frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        self.wait_for_exit()?;
                        info!(total_frames = self.frame_count, "video stream ended");
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    let reason = self.wait_for_exit().err().map(|e| format!(": {e:#}"));
                    bail!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes){}",
                        self.frame_bytes,
                        reason.unwrap_or_default(),
                    );
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buf)
            .context("failed to create RgbImage from raw frame data")?;

        let frame_number = self.frame_count;
        let timestamp_seconds = if self.info.fps > 0.0 {
            frame_number as f64 / self.info.fps
        } else {
            0.0
        };
        self.frame_count += 1;

        debug!(frame_number, timestamp_seconds, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            timestamp_seconds,
        }))
    }

    /// Decode every remaining frame into memory.
    pub fn read_all(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Reap ffmpeg after its stdout closed and fail if it did not exit cleanly.
    fn wait_for_exit(&mut self) -> Result<()> {
        self.finished = true;
        let status = self.child.wait().context("failed to wait for ffmpeg decoder")?;
        let stderr = self.stderr.collect();
        if !status.success() {
            error!(%status, %stderr, frames = self.frame_count, "ffmpeg decoder failed");
            bail!("ffmpeg decoder exited with {status}: {stderr}");
        }
        Ok(())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(total_frames = self.frame_count, "closing video decoder");
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
