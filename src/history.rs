use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::types::HistoryRecord;

/// Append-only newline-delimited JSON log of processed scans.
///
/// Each record is written with one `write_all` on an `O_APPEND` handle while
/// holding an in-process lock, so concurrent callers never interleave partial
/// lines. The file is never read back, rewritten or rotated here.
#[derive(Debug)]
pub struct HistoryRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `record` and append it as a single line, creating the file if needed.
    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("failed to serialize history record")?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .context("history writer task panicked")?
    }
}

fn append_line(path: &Path, line: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open history file: {}", path.display()))?;
    file.write_all(line)
        .with_context(|| format!("failed to append to history file: {}", path.display()))?;
    Ok(())
}

/// Read every record from a history file. Blank lines are skipped.
pub fn read_history(path: impl AsRef<Path>) -> Result<Vec<HistoryRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read history file: {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}: line {}: invalid history record", path.display(), idx + 1))
        })
        .collect()
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
