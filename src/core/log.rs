//! Log sinks for statement failures.
//!
//! The persistence core reports an execution failure as one line of text to
//! whatever sink the connection was given; it never retries.
use crate::config::{LogConfig, LogTarget};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Receiver of diagnostic log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards every line to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        error!("{}", message);
    }
}

/// Appends timestamped lines to a log file.
#[derive(Debug, Clone)]
pub struct FileTarget {
    path: PathBuf,
}

impl FileTarget {
    pub fn new(dir: impl Into<PathBuf>, file_name: &str) -> Self {
        Self {
            path: dir.into().join(file_name),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
    }
}

impl LogSink for FileTarget {
    fn log(&self, message: &str) {
        if let Err(e) = self.append(message) {
            warn!("Failed to write log file {:?}: {}", self.path, e);
        }
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

/// Builds the sink selected by the `[log]` configuration section.
pub fn sink_from_config(config: &LogConfig) -> Arc<dyn LogSink> {
    match config.target {
        LogTarget::Tracing => Arc::new(TracingSink),
        LogTarget::File => Arc::new(FileTarget::new(&config.path, &config.file_name)),
    }
}
