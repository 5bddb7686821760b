use crate::config::LogConfig;
use crate::error::{HerderError, Result};
use crate::logs::{DateFormat, LogStream};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// LogSink writes one app's stdout and stderr lines to its configured files.
///
/// With `merge_logs` both streams go to `out_file`; `error_file` is still
/// created so operators find it where they expect it.
pub struct LogSink {
    /// Path to stdout log file
    out_path: PathBuf,
    /// Path to stderr log file
    error_path: PathBuf,
    /// Async file handle for stdout
    out_file: TokioFile,
    /// Async file handle for stderr, `None` when streams are merged
    error_file: Option<TokioFile>,
    /// Prefix format for each line
    date_format: Option<DateFormat>,
}

impl LogSink {
    /// Open (or create) the log files described by `config` in append mode
    ///
    /// # Arguments
    /// * `config` - Log paths, merge flag and timestamp format
    ///
    /// # Returns
    /// * `Ok(LogSink)` - Files are open and ready
    /// * `Err(HerderError)` - A parent directory or file could not be created
    pub async fn open(config: &LogConfig) -> Result<Self> {
        let out_file = open_append(&config.out_file).await?;
        let error_file = open_append(&config.error_file).await?;

        Ok(Self {
            out_path: config.out_file.clone(),
            error_path: config.error_file.clone(),
            out_file,
            error_file: if config.merge_logs {
                None
            } else {
                Some(error_file)
            },
            date_format: config.date_format.clone(),
        })
    }

    /// Write one line captured from `stream`
    pub async fn write_line(&mut self, stream: LogStream, data: &[u8]) -> Result<()> {
        let entry = self.format_entry(data);

        let file = match (stream, self.error_file.as_mut()) {
            (LogStream::Stderr, Some(error_file)) => error_file,
            _ => &mut self.out_file,
        };

        file.write_all(&entry)
            .await
            .map_err(|e| HerderError::LogError(format!("Failed to write to log: {}", e)))?;

        // Flush so readers see lines in the order they were produced
        file.flush()
            .await
            .map_err(|e| HerderError::LogError(format!("Failed to flush log: {}", e)))?;

        Ok(())
    }

    /// Format a log entry, prefixing the timestamp when configured
    fn format_entry(&self, data: &[u8]) -> Vec<u8> {
        let prefix = self
            .date_format
            .as_ref()
            .map(|format| format!("{}: ", format.now()));

        let mut entry =
            Vec::with_capacity(prefix.as_ref().map_or(0, String::len) + data.len() + 1);
        if let Some(prefix) = prefix {
            entry.extend_from_slice(prefix.as_bytes());
        }
        entry.extend_from_slice(data);

        // Ensure newline at end if not present
        if !data.ends_with(b"\n") {
            entry.push(b'\n');
        }

        entry
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn is_merged(&self) -> bool {
        self.error_file.is_none()
    }
}

async fn open_append(path: &Path) -> Result<TokioFile> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            HerderError::LogError(format!(
                "Failed to create log directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            HerderError::LogFileError(format!("Failed to open {}: {}", path.display(), e))
        })?;

    Ok(TokioFile::from_std(file))
}
