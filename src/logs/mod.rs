// Logs module - Capture of child output into the configured log files

mod capture;
mod timestamp;
mod writer;

pub use capture::{attach, Capture, SharedSink};
pub use timestamp::DateFormat;
pub use writer::LogSink;

use std::fmt;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}
