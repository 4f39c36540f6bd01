use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

const CSV_HEADER: [&str; 2] = ["Video Name", "Frame Count"];

/// Frame count of one video, one row of the CSV report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameCountRecord {
    pub video_name: String,
    pub frame_count: u64,
}

/// Count frames of every video with `counter`. Videos that fail to count
/// are logged and left out.
pub fn collect<F>(videos: &[PathBuf], mut counter: F) -> Vec<FrameCountRecord>
where
    F: FnMut(&Path) -> Result<u64>,
{
    let mut records = Vec::with_capacity(videos.len());
    for video in videos {
        match counter(video) {
            Ok(frame_count) => {
                let video_name = video
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(%video_name, frame_count, "counted frames");
                records.push(FrameCountRecord {
                    video_name,
                    frame_count,
                });
            }
            Err(e) => warn!(?video, error = %e, "could not count frames, skipping video"),
        }
    }
    records
}

/// Write records as CSV with a `Video Name,Frame Count` header.
pub fn write_csv(records: &[FrameCountRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // The header is written by hand so an empty report still has one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(CSV_HEADER).context("failed to write CSV header")?;
    for record in records {
        writer.serialize(record).context("failed to write CSV record")?;
    }
    writer.flush().context("failed to flush CSV")?;

    info!(?path, rows = records.len(), "frame count CSV written");
    Ok(())
}

/// Number of videos per distinct frame count, ascending by frame count.
pub fn distribution(records: &[FrameCountRecord]) -> Vec<(u64, usize)> {
    let mut bins: BTreeMap<u64, usize> = BTreeMap::new();
    for r in records {
        *bins.entry(r.frame_count).or_default() += 1;
    }
    bins.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tracing_test::traced_test;

    fn record(name: &str, frame_count: u64) -> FrameCountRecord {
        FrameCountRecord {
            video_name: name.to_string(),
            frame_count,
        }
    }

    #[test]
    #[traced_test]
    fn collect_skips_failures() {
        let videos = vec![
            PathBuf::from("in/a.mp4"),
            PathBuf::from("in/broken.mp4"),
            PathBuf::from("in/sub/c.mov"),
        ];
        let records = collect(&videos, |p| {
            if p.ends_with("broken.mp4") {
                bail!("cannot open");
            }
            Ok(p.to_string_lossy().len() as u64)
        });

        assert_eq!(records, vec![record("a.mp4", 8), record("c.mov", 12)]);
        assert!(logs_contain("could not count frames"));
    }

    #[test]
    fn distribution_counts_videos_per_length() {
        let records = vec![
            record("a", 70),
            record("b", 45),
            record("c", 70),
            record("d", 90),
        ];
        assert_eq!(distribution(&records), vec![(45, 1), (70, 2), (90, 1)]);
        assert!(distribution(&[]).is_empty());
    }

    #[test]
    fn csv_has_header_and_rows() {
        let dir = std::env::temp_dir().join(format!("vidprep-{}-csv", std::process::id()));
        let path = dir.join("report.csv");
        write_csv(&[record("a.mp4", 70), record("b, take 2.mp4", 45)], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Video Name,Frame Count\na.mp4,70\n\"b, take 2.mp4\",45\n"
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_csv_keeps_header() {
        let dir = std::env::temp_dir().join(format!("vidprep-{}-csv-empty", std::process::id()));
        let path = dir.join("report.csv");
        write_csv(&[], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Video Name,Frame Count\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
