use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::orchestrator::{DownloadTask, TaskStatus};

/// One line of the download history (JSONL)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadLogEntry {
    pub timestamp: String,
    pub server: String,
    pub filename: String,
    pub destination: PathBuf,
    pub status: TaskStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
}

impl DownloadLogEntry {
    pub fn from_task(server: &str, task: &DownloadTask) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            server: server.to_string(),
            filename: task.filename.clone(),
            destination: task.destination.clone(),
            status: task.status,
            bytes_transferred: task.bytes_transferred,
            total_bytes: task.total_bytes,
            error: task.error.clone(),
        }
    }
}

pub struct DownloadLog {
    log_file_path: PathBuf,
}

impl DownloadLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        DownloadLog {
            log_file_path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one JSON line per entry, creating the file and its directory.
    pub fn add_entries(&self, entries: &[DownloadLogEntry]) -> Result<()> {
        let path = &self.log_file_path;
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?,
            _ => {}
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open download log {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Every recorded outcome, oldest first. A missing file is an empty
    /// history; a line that does not parse is reported with its number.
    pub fn read_log(&self) -> Result<Vec<DownloadLogEntry>> {
        let file = match File::open(&self.log_file_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("open download log {}", self.log_file_path.display())
                })
            }
        };
        let mut entries = Vec::new();
        for (no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).with_context(|| {
                format!("{}:{}: bad history entry", self.log_file_path.display(), no + 1)
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
