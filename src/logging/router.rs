/*!
 * Log Router
 * Connects a child's stdout/stderr to its configured destinations
 */

use super::sink::{open_append, Destination, DestinationWriter, LogSink};
use super::timestamp::frame_line;
use crate::config::AppSpec;
use crate::core::limits::LOG_CHANNEL_CAPACITY;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Any readable child stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Output streams taken from a child
#[derive(Default)]
pub struct ChildStreams {
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
}

impl ChildStreams {
    /// Take whatever pipes the child was spawned with
    pub fn from_child(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(|s| Box::new(s) as BoxedReader),
            stderr: child.stderr.take().map(|s| Box::new(s) as BoxedReader),
        }
    }

    pub fn new(
        stdout: Option<impl AsyncRead + Send + Unpin + 'static>,
        stderr: Option<impl AsyncRead + Send + Unpin + 'static>,
    ) -> Self {
        Self {
            stdout: stdout.map(|s| Box::new(s) as BoxedReader),
            stderr: stderr.map(|s| Box::new(s) as BoxedReader),
        }
    }
}

impl std::fmt::Debug for ChildStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildStreams")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Routes child output to append-mode files
///
/// stdout goes to `out_file`, stderr to `error_file`, and both to
/// `log_file`. Destinations resolving to the same path share one writer so
/// a line is written once and per-stream order holds in every file.
#[derive(Debug, Clone)]
pub struct LogRouter {
    channel_capacity: usize,
}

impl LogRouter {
    pub fn new() -> Self {
        Self {
            channel_capacity: LOG_CHANNEL_CAPACITY,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Attach `streams` for instance `index` of `spec`
    ///
    /// A destination that cannot be opened is left out and reported in
    /// [`LogSink::degraded`]; the other destinations keep working and the
    /// stream is still drained.
    pub async fn attach(&self, streams: ChildStreams, spec: &AppSpec, index: u32) -> LogSink {
        let paths = spec.log_paths_for(index);
        let mut sink = LogSink::empty();

        let mut roles: BTreeMap<PathBuf, Vec<Destination>> = BTreeMap::new();
        for (path, role) in [
            (&paths.out, Destination::Out),
            (&paths.error, Destination::Error),
            (&paths.combined, Destination::Combined),
        ] {
            if let Some(path) = path {
                roles.entry(path.clone()).or_default().push(role);
            }
        }

        let mut stdout_targets = Vec::new();
        let mut stderr_targets = Vec::new();

        for (path, roles) in roles {
            let file = match open_append(&path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!(app = %spec.name, index, error = %e, "Log destination unavailable");
                    sink.degraded.push(e);
                    continue;
                }
            };

            let takes_stdout = roles.iter().any(|r| matches!(r, Destination::Out | Destination::Combined));
            let takes_stderr = roles.iter().any(|r| matches!(r, Destination::Error | Destination::Combined));

            let writer = DestinationWriter::spawn(path, roles, file, self.channel_capacity);
            if takes_stdout {
                stdout_targets.push(writer.tx.clone());
            }
            if takes_stderr {
                stderr_targets.push(writer.tx.clone());
            }
            sink.writers.push(writer.task);
        }

        if let Some(stdout) = streams.stdout {
            sink.readers.push(spawn_reader(stdout, stdout_targets, spec.time, "stdout"));
        }
        if let Some(stderr) = streams.stderr {
            sink.readers.push(spawn_reader(stderr, stderr_targets, spec.time, "stderr"));
        }

        debug!(
            app = %spec.name,
            index,
            writers = sink.writers.len(),
            degraded = sink.degraded.len(),
            "Log sink attached"
        );
        sink
    }
}

impl Default for LogRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read lines until EOF and fan each one out to `targets`
///
/// With no targets the stream is still drained so the child never blocks
/// on a full pipe.
fn spawn_reader(
    stream: BoxedReader,
    mut targets: Vec<mpsc::Sender<Vec<u8>>>,
    stamp: bool,
    label: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(stream = label, error = %e, "Child stream read failed");
                    break;
                }
            }

            if targets.is_empty() {
                continue;
            }

            let line = frame_line(&buf, stamp);
            let mut closed = Vec::new();
            for (i, tx) in targets.iter().enumerate() {
                if tx.send(line.clone()).await.is_err() {
                    closed.push(i);
                }
            }
            for i in closed.into_iter().rev() {
                targets.swap_remove(i);
            }
        }
    })
}
