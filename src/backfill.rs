//! Replays recorded snapshots into the backend through `POST /sensors/bulk`.
//!
//! Input is JSON lines, one snapshot per line, the same shape the bridge
//! uploads. Lines that fail to decode are skipped with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::models::SensorSnapshot;
use crate::uploader::Uploader;

pub const DEFAULT_CHUNK: usize = 100;

/// Outcome of one backfill run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub parsed: usize,
    pub skipped: usize,
    pub posted: usize,
    pub failed_chunks: usize,
}

/// Decode every usable snapshot from a JSON-lines reader.
pub fn read_snapshots<R: BufRead>(reader: R) -> Result<(Vec<SensorSnapshot>, usize)> {
    // ---
    let mut snapshots = Vec::new();
    let mut skipped = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SensorSnapshot>(line) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                warn!("Line {}: skipping record: {}", idx + 1, e);
                skipped += 1;
            }
        }
    }
    Ok((snapshots, skipped))
}

/// Post the file at `path` in chunks of `chunk` readings.
///
/// A failed chunk is logged and counted; the remaining chunks still go out.
pub async fn run(uploader: &Uploader, path: &Path, chunk: usize) -> Result<BackfillReport> {
    // ---
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let (snapshots, skipped) = read_snapshots(BufReader::new(file))?;

    let mut report = BackfillReport {
        parsed: snapshots.len(),
        skipped,
        ..BackfillReport::default()
    };
    info!(
        "Backfilling {} reading(s) from {} ({} skipped)",
        report.parsed,
        path.display(),
        skipped
    );

    for batch in snapshots.chunks(chunk.max(1)) {
        match uploader.post_bulk(batch).await {
            Ok(()) => report.posted += batch.len(),
            Err(_) => report.failed_chunks += 1,
        }
    }

    info!(
        "Backfill done: {} posted, {} chunk(s) failed",
        report.posted, report.failed_chunks
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_valid_lines_and_counts_bad_ones() {
        // ---
        let input = concat!(
            r#"{"deviceId":"esp32_serial","timestamp":"2025-03-26T12:00:00Z","temperature":38.5}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"deviceId":"esp32_serial","timestamp":"2025-03-26T12:00:02Z","heartRate":74,"rfidTag":"043a2b1c"}"#,
            "\n",
        );

        let (snapshots, skipped) = read_snapshots(Cursor::new(input)).unwrap();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(snapshots[0].channels.temperature, Some(38.5));
        assert_eq!(snapshots[1].channels.heart_rate, Some(74.0));
        assert_eq!(snapshots[1].rfid_tag.as_deref(), Some("043a2b1c"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        // ---
        let uploader = Uploader::new("http://127.0.0.1:9", std::time::Duration::from_millis(200)).unwrap();
        let result = run(&uploader, Path::new("/nonexistent/readings.jsonl"), DEFAULT_CHUNK).await;
        assert!(result.is_err());
    }
}
