/*!
 * Log Sink
 * Per-destination writer tasks and the handle that drains them
 */

use crate::core::errors::LogSinkError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lines coalesced into one `write_all`
const MAX_BATCH_LINES: usize = 256;

/// Which stream(s) feed a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Out,
    Error,
    Combined,
}

/// What one destination received over the life of a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationReport {
    pub path: PathBuf,
    pub roles: Vec<Destination>,
    pub lines: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LogSinkError>,
}

/// Summary returned by [`LogSink::finish`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    pub destinations: Vec<DestinationReport>,
    pub degraded: Vec<LogSinkError>,
}

impl SinkReport {
    pub fn lines_for(&self, role: Destination) -> u64 {
        self.destinations
            .iter()
            .filter(|d| d.roles.contains(&role))
            .map(|d| d.lines)
            .sum()
    }

    /// Every open or write failure seen by this sink
    pub fn errors(&self) -> impl Iterator<Item = &LogSinkError> {
        self.degraded
            .iter()
            .chain(self.destinations.iter().filter_map(|d| d.error.as_ref()))
    }
}

/// Open a destination for appending, creating parent directories
pub(crate) async fn open_append(path: &Path) -> Result<File, LogSinkError> {
    let open_err = |e: std::io::Error| LogSinkError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(open_err)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(open_err)
}

/// Single owner of one destination file
pub(crate) struct DestinationWriter {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub task: JoinHandle<DestinationReport>,
}

impl DestinationWriter {
    pub fn spawn(path: PathBuf, roles: Vec<Destination>, file: File, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_writer(path, roles, file, rx));
        Self { tx, task }
    }
}

/// Drain framed lines into `file`
///
/// Each batch is whole lines written with one `write_all`, so appenders
/// sharing a file never interleave mid-line. After a write failure the
/// remaining lines are discarded to keep producers from blocking.
async fn run_writer(
    path: PathBuf,
    roles: Vec<Destination>,
    mut file: File,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> DestinationReport {
    let mut lines = 0u64;
    let mut error = None;
    let mut batch = Vec::new();

    while let Some(first) = rx.recv().await {
        batch.clear();
        batch.extend_from_slice(&first);
        let mut count = 1u64;
        while count < MAX_BATCH_LINES as u64 {
            match rx.try_recv() {
                Ok(line) => {
                    batch.extend_from_slice(&line);
                    count += 1;
                }
                Err(_) => break,
            }
        }

        if error.is_some() {
            continue;
        }

        match file.write_all(&batch).await {
            Ok(()) => lines += count,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Log write failed, discarding further output");
                error = Some(LogSinkError::Write {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if error.is_none() {
        if let Err(e) = file.flush().await {
            error = Some(LogSinkError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    }

    debug!(path = %path.display(), lines, "Log destination closed");
    DestinationReport {
        path,
        roles,
        lines,
        error,
    }
}

/// Live log routing for one run of one instance
///
/// Dropping the sink leaves its tasks running until the child's streams
/// close; [`finish`](Self::finish) waits for that and collects the counts.
#[derive(Debug)]
pub struct LogSink {
    pub(crate) readers: Vec<JoinHandle<()>>,
    pub(crate) writers: Vec<JoinHandle<DestinationReport>>,
    pub(crate) degraded: Vec<LogSinkError>,
}

impl LogSink {
    /// A sink with nothing attached
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
            degraded: Vec::new(),
        }
    }

    /// Destinations that could not be opened
    pub fn degraded(&self) -> &[LogSinkError] {
        &self.degraded
    }

    /// Wait for the child's streams to reach EOF and every writer to flush
    ///
    /// Readers still blocked after `timeout` (a grandchild holding the pipe)
    /// are aborted; everything they already forwarded is still written.
    pub async fn finish(self, timeout: Duration) -> SinkReport {
        // Too far out to represent means no deadline
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        for mut reader in self.readers {
            let Some(deadline) = deadline else {
                let _ = reader.await;
                continue;
            };
            if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
                debug!("Log reader still open at drain deadline, aborting");
                reader.abort();
                let _ = reader.await;
            }
        }

        let mut destinations = Vec::with_capacity(self.writers.len());
        for writer in self.writers {
            match writer.await {
                Ok(report) => destinations.push(report),
                Err(e) => warn!(error = %e, "Log writer task failed"),
            }
        }

        SinkReport {
            destinations,
            degraded: self.degraded,
        }
    }
}
