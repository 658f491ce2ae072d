//! Batch downloads: one independent worker (task + connection) per file.
//!
//! Workers never touch the task table. They publish `TaskEvent`s on an
//! unbounded channel and the `Batch`, which owns the table, applies them when
//! its owner drains the queue. Every task reaches Completed or Failed exactly
//! once, even if its worker dies.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::client::{self, Connection};
use crate::config::ClientConfig;
use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Connecting,
    Listing,
    Downloading,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_final(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Connecting => "connecting",
            TaskStatus::Listing => "listing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// One requested file and what is known about its download so far
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub filename: String,
    pub destination: PathBuf,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl DownloadTask {
    fn new(filename: String, destination: PathBuf) -> Self {
        Self {
            filename,
            destination,
            bytes_transferred: 0,
            total_bytes: 0,
            status: TaskStatus::Pending,
            error: None,
        }
    }
}

/// Published by a worker; `index` is the task's position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Status {
        index: usize,
        status: TaskStatus,
    },
    Progress {
        index: usize,
        bytes_transferred: u64,
        total_bytes: u64,
    },
    Finished {
        index: usize,
        result: std::result::Result<u64, String>,
    },
}

impl TaskEvent {
    pub fn index(&self) -> usize {
        match self {
            TaskEvent::Status { index, .. }
            | TaskEvent::Progress { index, .. }
            | TaskEvent::Finished { index, .. } => *index,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// LIST before DOWNLOAD and fail early if the file is not offered
    pub check_listing: bool,
}

/// Totals over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub bytes: u64,
}

pub struct Orchestrator {
    config: Arc<ClientConfig>,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Spawn one worker per distinct filename, downloading into
    /// `destination_dir/<filename>`. Must be called inside a tokio runtime.
    /// Returns immediately.
    pub fn start<I, S>(&self, files: I, destination_dir: &Path, options: BatchOptions) -> Batch
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let tasks: Vec<DownloadTask> = files
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| seen.insert(name.clone()))
            .map(|name| {
                let dest = destination_dir.join(&name);
                DownloadTask::new(name, dest)
            })
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        for (index, task) in tasks.iter().enumerate() {
            let worker = Worker {
                index,
                filename: task.filename.clone(),
                destination: task.destination.clone(),
                config: Arc::clone(&self.config),
                options: options.clone(),
                tx: tx.clone(),
            };
            tokio::spawn(worker.run());
        }
        // Only workers hold senders now; the channel closes when the last exits

        Batch {
            tasks,
            rx,
            synthetic: VecDeque::new(),
        }
    }
}

struct Worker {
    index: usize,
    filename: String,
    destination: PathBuf,
    config: Arc<ClientConfig>,
    options: BatchOptions,
    tx: UnboundedSender<TaskEvent>,
}

impl Worker {
    async fn run(self) {
        let result = self.download().await;
        if let Err(ref e) = result {
            warn!(file = %self.filename, error = %e, "download failed");
        }
        let _ = self.tx.send(TaskEvent::Finished {
            index: self.index,
            result: result.map_err(|e| e.to_string()),
        });
    }

    fn status(&self, status: TaskStatus) {
        let _ = self.tx.send(TaskEvent::Status {
            index: self.index,
            status,
        });
    }

    /// connect -> [list] -> download -> close, on a connection of its own
    async fn download(&self) -> Result<u64> {
        self.status(TaskStatus::Connecting);
        let mut conn = client::connect(&self.config).await?;
        let result = self.transfer(&mut conn).await;
        conn.close().await;
        result
    }

    async fn transfer(&self, conn: &mut Connection) -> Result<u64> {
        if self.options.check_listing {
            self.status(TaskStatus::Listing);
            let names = conn.list_files().await?;
            if !names.iter().any(|n| *n == self.filename) {
                return Err(TransferError::FileNotFound(self.filename.clone()));
            }
        }
        self.status(TaskStatus::Downloading);
        let index = self.index;
        let tx = &self.tx;
        conn.download_file(&self.filename, &self.destination, |bytes_transferred, total_bytes| {
            let _ = tx.send(TaskEvent::Progress {
                index,
                bytes_transferred,
                total_bytes,
            });
        })
        .await
    }
}

/// Owner side of a running batch
pub struct Batch {
    tasks: Vec<DownloadTask>,
    rx: UnboundedReceiver<TaskEvent>,
    // Failures synthesized for workers that exited without reporting
    synthetic: VecDeque<TaskEvent>,
}

impl Batch {
    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    /// True once every task is Completed or Failed
    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_final())
    }

    pub fn summary(&self) -> BatchSummary {
        self.tasks.iter().fold(BatchSummary::default(), |mut s, t| {
            match t.status {
                TaskStatus::Completed => {
                    s.completed += 1;
                    s.bytes += t.bytes_transferred;
                }
                TaskStatus::Failed => s.failed += 1,
                _ => {}
            }
            s
        })
    }

    /// Apply every queued event without waiting. Returns the applied events.
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        let mut applied = Vec::new();
        loop {
            let ev = match self.rx.try_recv() {
                Ok(ev) => ev,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.reap_orphans();
                    match self.synthetic.pop_front() {
                        Some(ev) => ev,
                        None => break,
                    }
                }
            };
            if self.apply(&ev) {
                applied.push(ev);
            }
        }
        applied
    }

    /// Wait for the next event and apply it. `None` once the batch is done.
    pub async fn next_update(&mut self) -> Option<TaskEvent> {
        while !self.is_done() {
            let ev = match self.synthetic.pop_front() {
                Some(ev) => ev,
                None => match self.rx.recv().await {
                    Some(ev) => ev,
                    None => {
                        self.reap_orphans();
                        continue;
                    }
                },
            };
            if self.apply(&ev) {
                return Some(ev);
            }
        }
        None
    }

    /// Run the batch to completion and hand back the final task table.
    pub async fn wait(mut self) -> Vec<DownloadTask> {
        while self.next_update().await.is_some() {}
        self.tasks
    }

    /// Update the table. Events for a task that is already final are
    /// ignored, which keeps the final status unique.
    fn apply(&mut self, ev: &TaskEvent) -> bool {
        let Some(task) = self.tasks.get_mut(ev.index()) else {
            return false;
        };
        if task.status.is_final() {
            debug!(?ev, "ignoring event for finished task");
            return false;
        }
        match ev {
            TaskEvent::Status { status, .. } => task.status = *status,
            TaskEvent::Progress {
                bytes_transferred,
                total_bytes,
                ..
            } => {
                task.bytes_transferred = *bytes_transferred;
                task.total_bytes = *total_bytes;
            }
            TaskEvent::Finished { result, .. } => match result {
                Ok(bytes) => {
                    task.status = TaskStatus::Completed;
                    task.bytes_transferred = *bytes;
                    task.total_bytes = *bytes;
                }
                Err(msg) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(msg.clone());
                }
            },
        }
        true
    }

    /// Channel closed: every worker is gone. Tasks still not final had a
    /// worker die before reporting.
    fn reap_orphans(&mut self) {
        for (index, task) in self.tasks.iter().enumerate() {
            let queued = self.synthetic.iter().any(|ev| ev.index() == index);
            if !task.status.is_final() && !queued {
                self.synthetic.push_back(TaskEvent::Finished {
                    index,
                    result: Err("download worker exited without reporting a result".into()),
                });
            }
        }
    }
}
