use std::io::Read;
use std::path::PathBuf;
use std::process::Child;
use std::thread::{self, JoinHandle};

/// Locations of the ffmpeg and ffprobe executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    /// Both tools looked up on `PATH`.
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Collects a child's stderr on a background thread so the child never
/// blocks on a full pipe while we are busy with stdin or stdout.
pub(crate) struct StderrDrain(Option<JoinHandle<String>>);

impl StderrDrain {
    pub(crate) fn spawn(child: &mut Child) -> Self {
        let handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).trim().to_string()
            })
        });
        Self(handle)
    }

    /// Everything the child wrote to stderr. Only returns once the child has
    /// closed its end, so call it after the child exits. Later calls return
    /// an empty string.
    pub(crate) fn collect(&mut self) -> String {
        self.0
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}
