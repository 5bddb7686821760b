use crate::error::{HerderError, Result};
use crate::logs::{LogStream, LogSink};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest line kept whole; longer output is written in pieces of this size
const MAX_LINE_BYTES: usize = 64 * 1024;

/// A log sink shared by the stdout and stderr readers of one app
pub type SharedSink = Arc<Mutex<LogSink>>;

/// Handles to the reader tasks draining a child's pipes
pub struct Capture {
    tasks: Vec<JoinHandle<()>>,
}

impl Capture {
    /// Wait until both pipes hit EOF and every line is written
    pub async fn finish(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Log capture task failed: {}", e);
            }
        }
    }
}

/// Take stdout and stderr from a child process and route each line to `sink`
///
/// Each stream is read by its own task, so lines from one stream keep
/// their order while the two streams interleave freely.
///
/// # Arguments
/// * `name` - App name, for diagnostics
/// * `child` - Child spawned with piped stdout and stderr
/// * `sink` - Destination shared with other captures of the same app
pub fn attach(name: &str, child: &mut Child, sink: SharedSink) -> Result<Capture> {
    let stdout = child.stdout.take().ok_or_else(|| {
        HerderError::LogError(format!("No stdout pipe available for process {}", name))
    })?;

    let stderr = child.stderr.take().ok_or_else(|| {
        HerderError::LogError(format!("No stderr pipe available for process {}", name))
    })?;

    let tasks = vec![
        tokio::spawn(pump(
            name.to_string(),
            LogStream::Stdout,
            stdout,
            Arc::clone(&sink),
        )),
        tokio::spawn(pump(name.to_string(), LogStream::Stderr, stderr, sink)),
    ];

    Ok(Capture { tasks })
}

/// Background task copying one pipe into the sink line by line
async fn pump<R>(name: String, stream: LogStream, pipe: R, sink: SharedSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let mut sink = sink.lock().await;
                if let Err(e) = sink.write_line(stream, &line).await {
                    warn!("Dropping {} line for {}: {}", stream, name, e);
                }
            }
            Err(e) => {
                debug!("Stopped reading {} for {}: {}", stream, name, e);
                break;
            }
        }
    }
}
