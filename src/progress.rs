//! Terminal progress display for a download batch
//!
//! One bar per requested file, stacked with `MultiProgress`:
//! - byte progress while downloading
//! - a final green/red line per file once its task is final

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::orchestrator::{DownloadTask, TaskEvent, TaskStatus};

pub struct BatchProgress {
    bars: Vec<ProgressBar>,
}

fn waiting_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.green} {prefix:30!} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:30!} [{bar:30.cyan/blue}] {bytes:>10}/{total_bytes:>10} {bytes_per_sec:>12}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
}

fn completed_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:30!} {msg:.green}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:30!} {msg:.red}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl BatchProgress {
    /// `hidden` draws nothing, for non-interactive output.
    pub fn new(tasks: &[DownloadTask], hidden: bool) -> Self {
        let mp = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        let bars = tasks
            .iter()
            .map(|t| {
                let pb = mp.add(ProgressBar::new_spinner());
                pb.set_style(waiting_style());
                pb.set_prefix(t.filename.clone());
                pb.set_message(t.status.to_string());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            })
            .collect();
        Self { bars }
    }

    /// Reflect an applied event; `task` is the table entry after applying it.
    pub fn update(&self, event: &TaskEvent, task: &DownloadTask) {
        let Some(pb) = self.bars.get(event.index()) else {
            return;
        };
        match event {
            TaskEvent::Status { status, .. } => pb.set_message(status.to_string()),
            TaskEvent::Progress {
                bytes_transferred,
                total_bytes,
                ..
            } => {
                if pb.length() != Some(*total_bytes) {
                    pb.disable_steady_tick();
                    pb.set_style(bytes_style());
                    pb.set_length(*total_bytes);
                }
                pb.set_position(*bytes_transferred);
            }
            TaskEvent::Finished { .. } => {
                let msg = match task.status {
                    TaskStatus::Completed => {
                        pb.set_style(completed_style());
                        format!(
                            "Completed {:.1} MB",
                            task.bytes_transferred as f64 / 1_048_576.0
                        )
                    }
                    _ => {
                        pb.set_style(failed_style());
                        format!("Failed {}", task.error.as_deref().unwrap_or("unknown error"))
                    }
                };
                pb.finish_with_message(msg);
            }
        }
    }

    pub fn finish(&self) {
        for pb in &self.bars {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}
