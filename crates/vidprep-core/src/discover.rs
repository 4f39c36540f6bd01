use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

/// Extensions treated as video files when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Whether `path` has one of `extensions` (case-insensitive, without the dot).
pub fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Recursively collect video files under `root`, sorted by path.
pub fn find_videos(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("input directory does not exist: {}", root.display());
    }

    let mut videos = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_video_file(entry.path(), extensions) {
            continue;
        }
        debug!(path = ?entry.path(), "found video");
        videos.push(entry.into_path());
    }

    videos.sort();
    info!(?root, count = videos.len(), "video discovery complete");
    Ok(videos)
}

/// The directory under `output_root` that mirrors the parent of `video`
/// relative to `input_root`.
pub fn mirror_dir(input_root: &Path, output_root: &Path, video: &Path) -> PathBuf {
    let parent = video.parent().unwrap_or(input_root);
    match parent.strip_prefix(input_root) {
        Ok(rel) => output_root.join(rel),
        Err(_) => output_root.to_path_buf(),
    }
}

/// Fail unless `output_root` lies outside `input_root`.
///
/// Outputs are named after their sources, so writing into the input tree
/// can overwrite a video while it is being read, and a later run would pick
/// the outputs up as inputs. `output_root` does not need to exist yet.
pub fn ensure_separate_trees(input_root: &Path, output_root: &Path) -> Result<()> {
    let input = resolve(input_root)?;
    let output = resolve(output_root)?;
    if output.starts_with(&input) {
        bail!(
            "output directory {} must not be inside input directory {}",
            output_root.display(),
            input_root.display(),
        );
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved for the part that exists.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to read current directory")?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

/// File stem of `video` as a string, lossily converted.
pub fn file_stem(video: &Path) -> String {
    video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
