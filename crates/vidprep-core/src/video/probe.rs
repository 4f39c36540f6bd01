use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use super::tools::FfmpegTools;

/// Video stream metadata obtained by probing with ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count recorded by the container, if it records one.
    pub frame_count: Option<u64>,
}

/// Probe the first video stream of `path`.
pub fn probe(path: &Path, tools: &FfmpegTools) -> Result<VideoInfo> {
    info!(?path, "probing video metadata with ffprobe");

    let stdout = run_ffprobe(
        tools,
        path,
        &[
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,nb_frames",
            "-of", "csv=p=0",
        ],
    )?;

    let info = parse_stream_line(&stdout)?;
    if info.fps <= 0.0 {
        warn!(fps = info.fps, ?path, "video has non-positive fps, timestamps will be 0.0");
    }

    info!(
        width = info.width,
        height = info.height,
        fps = info.fps,
        frame_count = ?info.frame_count,
        "probe completed"
    );
    Ok(info)
}

/// Number of frames in the first video stream.
///
/// Uses the container's frame count when present and falls back to counting
/// packets, which reads the whole stream but does not decode it.
pub fn count_frames(path: &Path, tools: &FfmpegTools) -> Result<u64> {
    if let Some(count) = probe(path, tools)?.frame_count {
        return Ok(count);
    }

    debug!(?path, "container has no frame count, counting packets");
    let stdout = run_ffprobe(
        tools,
        path,
        &[
            "-select_streams", "v:0",
            "-count_packets",
            "-show_entries", "stream=nb_read_packets",
            "-of", "csv=p=0",
        ],
    )?;

    let line = first_line(&stdout)?;
    let count = line
        .trim_end_matches(',')
        .parse()
        .with_context(|| format!("failed to parse packet count {line:?}"))?;
    Ok(count)
}

fn run_ffprobe(tools: &FfmpegTools, path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(&tools.ffprobe)
        .args(["-v", "error"])
        .args(args)
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe, is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn first_line(stdout: &str) -> Result<&str> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .with_context(|| format!("ffprobe produced no stream output: {stdout:?}"))
}

/// Parse `width,height,num/den[,nb_frames]` as printed by ffprobe's csv writer.
fn parse_stream_line(stdout: &str) -> Result<VideoInfo> {
    let line = first_line(stdout)?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        error!(%stdout, "unexpected ffprobe output format, expected width,height,fps");
        bail!("unexpected ffprobe output: {stdout}");
    }

    let width: u32 = parts[0].parse().context("failed to parse width")?;
    let height: u32 = parts[1].parse().context("failed to parse height")?;
    let fps = parse_frame_rate(parts[2])?;

    // "N/A" when the container does not store a frame count.
    let frame_count = parts.get(3).and_then(|s| s.parse::<u64>().ok());

    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_count,
    })
}

fn parse_frame_rate(s: &str) -> Result<f64> {
    let fps = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        s.parse().context("failed to parse fps")?
    };
    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_stream_line() {
        let info = parse_stream_line("1920,1080,30000/1001,240\n").unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.frame_count, Some(240));
    }

    #[test]
    fn missing_frame_count_is_none() {
        let info = parse_stream_line("640,480,25/1,N/A").unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.frame_count, None);

        let info = parse_stream_line("640,480,25/1").unwrap();
        assert_eq!(info.frame_count, None);
    }

    #[test]
    fn skips_leading_blank_lines() {
        let info = parse_stream_line("\n\n320,240,15/1,7\n").unwrap();
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!(info.frame_count, Some(7));
    }

    #[test]
    fn zero_denominator_gives_zero_fps() {
        assert_eq!(parse_frame_rate("0/0").unwrap(), 0.0);
        assert_eq!(parse_frame_rate("12.5").unwrap(), 12.5);
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(parse_stream_line("").is_err());
        assert!(parse_stream_line("1920,1080").is_err());
        assert!(parse_stream_line("wide,1080,30/1").is_err());
    }
}
